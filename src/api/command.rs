//! Administrative Commands
//!
//! Request bodies starting with `#roxy` are commands that inspect or change
//! the running gateway instead of being forwarded upstream.

use crate::config::{ApiKeyConfig, Provider, SelectionPolicy};
use crate::error::{Result, RoxyError};
use crate::router::RoutingRule;
use crate::Gateway;
use std::fmt::Write;
use tracing::info;

/// Marker that turns a request body into a command
pub const COMMAND_PREFIX: &str = "#roxy";

/// Defaults for keys added at runtime
const DEFAULT_MAX_RPM: u32 = 1000;
const DEFAULT_MAX_TPM: u64 = 100_000;

const ADD_KEY_USAGE: &str =
    "Usage: #roxy add key <provider> <key> [max_rpm] [max_tpm] [cooldown_sec]";
const ADD_RULE_USAGE: &str =
    "Usage: #roxy add rule <source_model> <random|roundrobin|fallback> <target_model>...";
const REMOVE_RULE_USAGE: &str = "Usage: #roxy remove rule <source_model>";
const LIST_USAGE: &str = "Usage: #roxy list keys|rules";
const CACHE_USAGE: &str = "Usage: #roxy cache clear|stats";

const HELP: &str = "Available commands:
#roxy add key <provider> <key> [max_rpm] [max_tpm] [cooldown_sec] - Add new API key
#roxy remove key - Not supported, keys live for the life of the process
#roxy list keys - List configured API keys
#roxy add rule <source_model> <policy> <target_model>... - Add or replace a model rule
#roxy remove rule <source_model> - Remove a model rule
#roxy list rules - List model rules
#roxy cache clear - Drop every cached response
#roxy cache stats - Show cache statistics
#roxy status - Show key and cache status
#roxy help - Show this help message";

/// Whether a request body is a command
pub fn is_command(body: &[u8]) -> bool {
    let trimmed = body.trim_ascii_start();
    match trimmed.strip_prefix(COMMAND_PREFIX.as_bytes()) {
        Some(rest) => rest.first().map_or(true, |b| b.is_ascii_whitespace()),
        None => false,
    }
}

/// A parsed administrative command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    AddKey(ApiKeyConfig),
    RemoveKey,
    ListKeys,
    AddRule(RoutingRule),
    RemoveRule(String),
    ListRules,
    CacheClear,
    CacheStats,
    Status,
}

impl Command {
    /// Parse a command body, prefix included
    pub fn parse(body: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(body)
            .map_err(|_| RoxyError::Command("Command must be valid UTF-8".to_string()))?;
        let text = text.trim();
        let rest = text.strip_prefix(COMMAND_PREFIX).ok_or_else(|| {
            RoxyError::Command(format!("Commands must start with {}", COMMAND_PREFIX))
        })?;
        let words: Vec<&str> = rest.split_whitespace().collect();

        match words.as_slice() {
            [] => Err(RoxyError::Command(
                "Invalid command format, try '#roxy help'".to_string(),
            )),
            ["help"] => Ok(Command::Help),
            ["add", "key", rest @ ..] => parse_add_key(rest),
            ["remove", "key", ..] => Ok(Command::RemoveKey),
            ["list", "keys"] => Ok(Command::ListKeys),
            ["list", "rules"] => Ok(Command::ListRules),
            ["list", ..] => Err(RoxyError::Command(LIST_USAGE.to_string())),
            ["add", "rule", rest @ ..] => parse_add_rule(rest),
            ["remove", "rule", source] => Ok(Command::RemoveRule(source.to_string())),
            ["remove", "rule", ..] => Err(RoxyError::Command(REMOVE_RULE_USAGE.to_string())),
            ["cache", "clear"] => Ok(Command::CacheClear),
            ["cache", "stats"] => Ok(Command::CacheStats),
            ["cache", ..] => Err(RoxyError::Command(CACHE_USAGE.to_string())),
            ["status"] => Ok(Command::Status),
            [verb, ..] => Err(RoxyError::Command(format!(
                "Unknown command '{}', try '#roxy help'",
                verb
            ))),
        }
    }

    /// Apply the command to `gateway`, returning the text answer
    pub fn execute(self, gateway: &Gateway) -> Result<String> {
        match self {
            Command::Help => Ok(HELP.to_string()),

            Command::AddKey(config) => {
                let provider = config.provider;
                gateway.credentials().add(&config);
                Ok(format!("Added key for provider: {}", provider))
            }

            Command::RemoveKey => Err(RoxyError::NotSupported(
                "Removing API keys is not supported".to_string(),
            )),

            Command::ListKeys => {
                let snapshots = gateway.credentials().snapshot();
                if snapshots.is_empty() {
                    return Ok("No API keys configured\n".to_string());
                }
                let mut out = String::new();
                for snap in snapshots {
                    let _ = write!(
                        out,
                        "Provider: {}, Key: {}, Requests: {}/{}, Tokens: {}/{}",
                        snap.provider,
                        snap.masked_key,
                        snap.usage_count,
                        snap.max_rpm,
                        snap.tokens_used,
                        snap.max_tpm
                    );
                    if let Some(remaining) = snap.cooldown_remaining {
                        let _ = write!(out, ", Cooling down: {}s", remaining.as_secs().max(1));
                    }
                    out.push('\n');
                }
                Ok(out)
            }

            Command::AddRule(rule) => {
                let answer = format!(
                    "Set rule: {} {} -> {}",
                    rule.source_model(),
                    rule.policy(),
                    rule.target_models().join(", ")
                );
                gateway.routing().add_rule(rule);
                Ok(answer)
            }

            Command::RemoveRule(source) => {
                if gateway.routing().remove_rule(&source) {
                    Ok(format!("Removed rule for model: {}", source))
                } else {
                    Err(RoxyError::Command(format!("No rule for model: {}", source)))
                }
            }

            Command::ListRules => {
                let rules = gateway.routing().rules();
                if rules.is_empty() {
                    return Ok("No model rules configured\n".to_string());
                }
                let mut out = String::new();
                for rule in rules {
                    let _ = writeln!(
                        out,
                        "{} {} -> {}",
                        rule.source_model(),
                        rule.policy(),
                        rule.target_models().join(", ")
                    );
                }
                Ok(out)
            }

            Command::CacheClear => {
                let cleared = gateway.cache().clear();
                info!(cleared, "response cache cleared");
                Ok(format!("Cleared {} cache entries", cleared))
            }

            Command::CacheStats => Ok(cache_line(gateway)),

            Command::Status => {
                let mut out = String::new();
                for provider in Provider::ALL {
                    let stats = gateway.credentials().stats(provider);
                    if stats.total_keys == 0 {
                        continue;
                    }
                    let _ = writeln!(
                        out,
                        "{}: {} keys ({} available, {} cooling down), {} requests this window, {} total",
                        provider,
                        stats.total_keys,
                        stats.available_keys,
                        stats.cooling_down_keys,
                        stats.window_requests,
                        stats.total_requests
                    );
                }
                let _ = writeln!(out, "Rules: {}", gateway.routing().rules().len());
                out.push_str(&cache_line(gateway));
                Ok(out)
            }
        }
    }
}

fn cache_line(gateway: &Gateway) -> String {
    let cache = gateway.cache();
    if !cache.is_enabled() {
        return "Cache: disabled".to_string();
    }
    let stats = cache.stats();
    format!(
        "Cache: {} entries, {} hits, {} misses, {:.1}% hit rate, ttl {}s",
        stats.entries,
        stats.hits,
        stats.misses,
        stats.hit_rate(),
        stats.ttl.as_secs()
    )
}

fn parse_add_key(args: &[&str]) -> Result<Command> {
    let usage = || RoxyError::Command(ADD_KEY_USAGE.to_string());

    let (provider, key, limits) = match args {
        [provider, key, limits @ ..] if limits.len() <= 3 => (*provider, *key, limits),
        _ => return Err(usage()),
    };

    let provider: Provider = provider
        .parse()
        .map_err(|e: String| RoxyError::Command(format!("{}\n{}", e, ADD_KEY_USAGE)))?;

    let max_rpm = match limits.first() {
        Some(v) => v.parse::<u32>().ok().filter(|n| *n > 0).ok_or_else(usage)?,
        None => DEFAULT_MAX_RPM,
    };
    let max_tpm = match limits.get(1) {
        Some(v) => v.parse::<u64>().ok().filter(|n| *n > 0).ok_or_else(usage)?,
        None => DEFAULT_MAX_TPM,
    };
    let cooldown = match limits.get(2) {
        Some(v) => v.parse::<u64>().map_err(|_| usage())?,
        None => 0,
    };

    let config =
        ApiKeyConfig::new(provider, key.to_string(), max_rpm, max_tpm).with_cooldown(cooldown);
    config
        .check_secret()
        .map_err(|e| RoxyError::Command(format!("{}\n{}", e, ADD_KEY_USAGE)))?;

    Ok(Command::AddKey(config))
}

fn parse_add_rule(args: &[&str]) -> Result<Command> {
    let [source, policy, targets @ ..] = args else {
        return Err(RoxyError::Command(ADD_RULE_USAGE.to_string()));
    };
    if targets.is_empty() {
        return Err(RoxyError::Command(ADD_RULE_USAGE.to_string()));
    }

    let policy: SelectionPolicy = policy
        .parse()
        .map_err(|e: String| RoxyError::Command(format!("{}\n{}", e, ADD_RULE_USAGE)))?;

    let rule = RoutingRule::new(
        source.to_string(),
        targets.iter().map(|t| t.to_string()).collect(),
        policy,
    )
    .map_err(|e| RoxyError::Command(e.to_string()))?;

    Ok(Command::AddRule(rule))
}
