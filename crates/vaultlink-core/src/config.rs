use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{collection::CollectLimits, domain::ChatId, errors::Error, Result};

const DEFAULT_START_MESSAGE: &str =
    "Hello! I deliver files from a private archive. Open a shared link to receive its content.";

/// Typed configuration, read from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub operator_ids: Vec<i64>,
    pub archive_channel: ChatId,
    pub archive_username: Option<String>,
    pub force_sub_channels: Vec<i64>,

    // Delivery
    pub auto_delete: Option<Duration>,
    pub protect_content: bool,
    pub collect_limits: CollectLimits,
    pub broadcast_progress_every: usize,

    // Persistence
    pub data_file: PathBuf,

    // Texts
    pub start_message: String,

    // Rate limiting of link opens
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup (env, test map, ...).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let str_of = |key: &str| get(key).and_then(non_empty);
        let parse_of = |key: &str| -> Result<Option<u64>> {
            match str_of(key) {
                None => Ok(None),
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| Error::Config(format!("{key} must be a non-negative integer"))),
            }
        };
        let bool_of = |key: &str| str_of(key).map(|s| parse_bool(&s));

        // Required
        let telegram_bot_token = str_of("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;
        let operator_ids = parse_csv_i64(str_of("OPERATOR_IDS"));
        if operator_ids.is_empty() {
            return Err(Error::Config(
                "OPERATOR_IDS environment variable is required".to_string(),
            ));
        }
        let archive_channel = str_of("ARCHIVE_CHANNEL_ID")
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|id| *id != 0)
            .map(ChatId)
            .ok_or_else(|| {
                Error::Config("ARCHIVE_CHANNEL_ID must be a non-zero channel id".to_string())
            })?;
        let archive_username =
            str_of("ARCHIVE_CHANNEL_USERNAME").map(|s| s.trim().trim_start_matches('@').to_string());
        let force_sub_channels = parse_csv_i64(str_of("FORCE_SUB_CHANNELS"));

        // Delivery
        let auto_delete = match parse_of("AUTO_DELETE_SECS")?.unwrap_or(0) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let protect_content = bool_of("PROTECT_CONTENT").unwrap_or(false);

        let max_items = parse_of("MAX_COLLECT_ITEMS")?.unwrap_or(100);
        let max_range = parse_of("MAX_RANGE_ITEMS")?.unwrap_or(200);
        if max_items == 0 || max_range == 0 {
            return Err(Error::Config(
                "MAX_COLLECT_ITEMS and MAX_RANGE_ITEMS must be at least 1".to_string(),
            ));
        }
        let collect_limits = CollectLimits {
            max_items: usize::try_from(max_items).unwrap_or(usize::MAX),
            max_range,
        };

        let broadcast_progress_every = parse_of("BROADCAST_PROGRESS_EVERY")?.unwrap_or(20);
        if broadcast_progress_every == 0 {
            return Err(Error::Config(
                "BROADCAST_PROGRESS_EVERY must be at least 1".to_string(),
            ));
        }

        let data_file =
            PathBuf::from(str_of("DATA_FILE").unwrap_or_else(|| "vaultlink-data.json".to_string()));
        let start_message =
            str_of("START_MESSAGE").unwrap_or_else(|| DEFAULT_START_MESSAGE.to_string());

        let rate_limit_enabled = bool_of("RATE_LIMIT_ENABLED").unwrap_or(true);
        let rate_limit_requests = u32::try_from(parse_of("RATE_LIMIT_REQUESTS")?.unwrap_or(10))
            .unwrap_or(u32::MAX);
        let rate_limit_window = Duration::from_secs(parse_of("RATE_LIMIT_WINDOW")?.unwrap_or(60));

        Ok(Self {
            telegram_bot_token,
            operator_ids,
            archive_channel,
            archive_username,
            force_sub_channels,
            auto_delete,
            protect_content,
            collect_limits,
            broadcast_progress_every: usize::try_from(broadcast_progress_every)
                .unwrap_or(usize::MAX),
            data_file,
            start_message,
            rate_limit_enabled,
            rate_limit_requests,
            rate_limit_window,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("TELEGRAM_BOT_TOKEN", "123:abc"),
        ("OPERATOR_IDS", "1, 2,x"),
        ("ARCHIVE_CHANNEL_ID", "-1001234567890"),
    ];

    #[test]
    fn defaults_apply() {
        let cfg = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(cfg.operator_ids, vec![1, 2]);
        assert_eq!(cfg.archive_channel, ChatId(-1001234567890));
        assert_eq!(cfg.auto_delete, None);
        assert_eq!(cfg.collect_limits.max_items, 100);
        assert_eq!(cfg.collect_limits.max_range, 200);
        assert_eq!(cfg.broadcast_progress_every, 20);
        assert!(cfg.rate_limit_enabled);
        assert!(!cfg.protect_content);
    }

    #[test]
    fn overrides_parse() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("AUTO_DELETE_SECS", "600"),
            ("PROTECT_CONTENT", "yes"),
            ("ARCHIVE_CHANNEL_USERNAME", "@MyArchive"),
            ("FORCE_SUB_CHANNELS", "-1001,-1002"),
            ("MAX_RANGE_ITEMS", "50"),
        ]);
        let cfg = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.auto_delete, Some(Duration::from_secs(600)));
        assert!(cfg.protect_content);
        assert_eq!(cfg.archive_username.as_deref(), Some("MyArchive"));
        assert_eq!(cfg.force_sub_channels, vec![-1001, -1002]);
        assert_eq!(cfg.collect_limits.max_range, 50);
    }

    #[test]
    fn rejects_missing_or_zero_limits() {
        assert!(matches!(
            Config::from_lookup(lookup(&REQUIRED[..2])),
            Err(Error::Config(_))
        ));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MAX_COLLECT_ITEMS", "0"));
        assert!(matches!(
            Config::from_lookup(lookup(&pairs)),
            Err(Error::Config(_))
        ));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("AUTO_DELETE_SECS", "soon"));
        assert!(matches!(
            Config::from_lookup(lookup(&pairs)),
            Err(Error::Config(_))
        ));
    }
}
