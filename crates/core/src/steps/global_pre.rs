//! Global settings migrated before any event data exists.
//!
//! Covers server-wide settings, payment currencies, news, IP-based access
//! groups, and the external-reference types passed on the command line.

use regex_lite::Regex;
use rusqlite::Connection;
use serde_json::json;

use crate::convert::{clean_text, parse_datetime, sanitize_user_input};
use crate::db::queries;
use crate::errors::MigrationError;
use crate::steps::{MigrationStep, StepEnv};

pub struct GlobalPreStep;

impl MigrationStep for GlobalPreStep {
    fn name(&self) -> &'static str {
        "global-pre"
    }

    fn run(&self, env: &mut StepEnv<'_>) -> Result<(), MigrationError> {
        let reporter = env.reporter.for_step(self.name());

        let reference_types = env.db.transaction(|conn| {
            migrate_api_settings(env, conn)?;
            migrate_global_settings(env, conn)?;
            migrate_payment_settings(env, conn, &reporter)?;
            migrate_news(env, conn, &reporter)?;
            migrate_global_ip_acl(env, conn, &reporter)?;
            migrate_networks(env, conn, &reporter)?;
            migrate_reference_types(env, conn)
        })?;
        for (name, id) in reference_types {
            env.ctx.reference_type_map.insert(name, id);
        }
        Ok(())
    }
}

fn migrate_api_settings(
    env: &StepEnv<'_>,
    conn: &Connection,
) -> Result<(), crate::errors::DatabaseError> {
    let api = &env.snapshot.info.api;
    queries::set_setting(conn, "api", "require_https", &json!(api.require_https))?;
    queries::set_setting(conn, "api", "allow_persistent", &json!(api.allow_persistent))?;
    queries::set_setting(conn, "api", "security_mode", &json!(api.security_mode))?;
    queries::set_setting(conn, "api", "cache_ttl", &json!(api.cache_ttl))?;
    queries::set_setting(conn, "api", "signature_ttl", &json!(api.signature_ttl))?;
    Ok(())
}

fn migrate_global_settings(
    env: &StepEnv<'_>,
    conn: &Connection,
) -> Result<(), crate::errors::DatabaseError> {
    let info = &env.snapshot.info;
    queries::set_setting(conn, "core", "site_title", &json!(clean_text(&info.title)))?;
    queries::set_setting(
        conn,
        "core",
        "site_organization",
        &json!(clean_text(&info.organisation)),
    )?;
    queries::set_setting(
        conn,
        "users",
        "notify_account_creation",
        &json!(info.notify_account_creation),
    )?;
    queries::set_setting(
        conn,
        "legal",
        "network_protected_disclaimer",
        &json!(clean_text(&info.network_disclaimer)),
    )?;
    queries::set_setting(
        conn,
        "legal",
        "restricted_disclaimer",
        &json!(clean_text(&info.restricted_disclaimer)),
    )?;
    queries::set_setting(
        conn,
        "news",
        "show_recent",
        &json!(info.news_active),
    )?;
    queries::set_setting(
        conn,
        "news",
        "new_days",
        &json!(env.snapshot.news.recent_days),
    )?;
    Ok(())
}

fn migrate_payment_settings(
    env: &StepEnv<'_>,
    conn: &Connection,
    reporter: &crate::report::Reporter,
) -> Result<(), crate::errors::DatabaseError> {
    let currencies: Vec<_> = env
        .snapshot
        .payment
        .currencies
        .iter()
        .filter(|c| !c.code.is_empty())
        .map(|c| json!({"code": c.code, "name": clean_text(&c.name)}))
        .collect();
    for currency in &currencies {
        reporter.info(&format!(
            "saving currency: name='{}', code={}",
            currency["name"].as_str().unwrap_or(""),
            currency["code"].as_str().unwrap_or(""),
        ));
    }
    queries::set_setting(conn, "payment", "currencies", &json!(currencies))?;
    queries::set_setting(
        conn,
        "payment",
        "currency",
        &json!(env.config.default_currency),
    )?;
    Ok(())
}

fn migrate_news(
    env: &StepEnv<'_>,
    conn: &Connection,
    reporter: &crate::report::Reporter,
) -> Result<(), crate::errors::DatabaseError> {
    let mut items: Vec<_> = env.snapshot.news.items.iter().collect();
    items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    for item in items {
        let created = match parse_datetime(&item.created_at) {
            Some(parsed) => parsed.dt,
            None => {
                reporter.warning(&format!(
                    "News item '{}' has an unparseable date, using epoch",
                    item.title
                ));
                chrono::DateTime::UNIX_EPOCH
            }
        };
        let title = sanitize_user_input(&item.title);
        queries::insert_news_item(conn, &title, &clean_text(&item.content), &created)?;
        reporter.success(&title);
    }
    Ok(())
}

fn migrate_global_ip_acl(
    env: &StepEnv<'_>,
    conn: &Connection,
    reporter: &crate::report::Reporter,
) -> Result<(), crate::errors::DatabaseError> {
    let networks: Vec<String> = env
        .snapshot
        .info
        .full_access_ips
        .iter()
        .filter_map(|mask| parse_network_mask(mask, reporter))
        .collect();
    if networks.is_empty() {
        reporter.error("No valid IPs found");
        return Ok(());
    }
    let group_id = queries::insert_ip_network_group(
        conn,
        "Full Attachment Access",
        "IPs that can access all attachments without authentication",
        true,
        true,
    )?;
    for network in &networks {
        queries::insert_ip_network(conn, group_id, network)?;
    }
    reporter.success_always(&format!(
        "Full Attachment Access ({} networks)",
        networks.len()
    ));
    Ok(())
}

fn migrate_networks(
    env: &StepEnv<'_>,
    conn: &Connection,
    reporter: &crate::report::Reporter,
) -> Result<(), crate::errors::DatabaseError> {
    for domain in &env.snapshot.domains {
        let name = clean_text(&domain.name);
        let networks: Vec<String> = domain
            .filters
            .iter()
            .filter_map(|mask| parse_network_mask(mask, reporter))
            .collect();
        if networks.is_empty() {
            reporter.warning(&format!("Domain has no valid IPs: {}", name));
        }
        let group_id =
            queries::insert_ip_network_group(conn, &name, &clean_text(&domain.description), false, false)?;
        for network in &networks {
            queries::insert_ip_network(conn, group_id, network)?;
        }
        reporter.success(&name);
    }
    Ok(())
}

/// Insert the CLI-configured reference types, returning `(lowercased name,
/// id)` pairs for the context map.
fn migrate_reference_types(
    env: &StepEnv<'_>,
    conn: &Connection,
) -> Result<Vec<(String, i64)>, crate::errors::DatabaseError> {
    let mut pairs = Vec::new();
    for name in &env.config.reference_types {
        let id = queries::insert_reference_type(conn, name)?;
        pairs.push((name.to_lowercase(), id));
    }
    Ok(pairs)
}

/// Convert a truncated legacy IP mask into CIDR notation.
///
/// The legacy store kept prefix lists like `128.141` (meaning 128.141.0.0/16)
/// or `2001:1458` (a /32). Invalid masks are warned about and dropped.
fn parse_network_mask(mask: &str, reporter: &crate::report::Reporter) -> Option<String> {
    let mask = clean_text(mask);
    let ipv4_re = Regex::new(r"^[0-9.]+$").ok()?;
    let ipv6_re = Regex::new(r"^[0-9a-f:]+$").ok()?;

    let net = if ipv4_re.is_match(&mask) {
        let trimmed = mask.trim_end_matches('.');
        let segments: Vec<&str> = trimmed.split('.').collect();
        if segments.len() <= 4 && segments.iter().all(|s| s.parse::<u8>().is_ok()) {
            let mut parts: Vec<String> = segments.iter().map(|s| s.to_string()).collect();
            while parts.len() < 4 {
                parts.push("0".into());
            }
            Some(format!("{}/{}", parts.join("."), 8 * segments.len()))
        } else {
            None
        }
    } else if ipv6_re.is_match(&mask) {
        // there shouldn't be a `::` in the mask as it was a prefix check
        let trimmed = mask.trim_end_matches(':');
        let segments: Vec<&str> = trimmed.split(':').collect();
        if segments.len() <= 8
            && segments.iter().all(|s| u16::from_str_radix(s, 16).is_ok())
        {
            let mut parts: Vec<String> = segments.iter().map(|s| s.to_string()).collect();
            while parts.len() < 8 {
                parts.push("0".into());
            }
            Some(format!("{}/{}", parts.join(":"), 16 * segments.len()))
        } else {
            None
        }
    } else {
        None
    };

    if net.is_none() {
        reporter.warning(&format!("Skipped invalid mask: {}", mask));
    }
    net
}
