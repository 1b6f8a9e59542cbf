// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Human-readable durations for pipeline files (`500ms`, `30s`, `5m`, `1h`).
//! Bare integers are read as seconds.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if duration.subsec_millis() == 0 {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    } else {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(n) => Ok(Duration::from_secs(n)),
        Raw::Text(s) => parse_duration_str(&s).map_err(serde::de::Error::custom),
    }
}

pub(crate) fn parse_duration_str(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let parse = |val: &str| -> Result<u64, String> {
        val.trim()
            .parse()
            .map_err(|e| format!("invalid duration '{}': {}", s, e))
    };

    if let Some(val) = s.strip_suffix("ms") {
        Ok(Duration::from_millis(parse(val)?))
    } else if let Some(val) = s.strip_suffix('s') {
        Ok(Duration::from_secs(parse(val)?))
    } else if let Some(val) = s.strip_suffix('m') {
        scaled(parse(val)?, 60)
    } else if let Some(val) = s.strip_suffix('h') {
        scaled(parse(val)?, 3600)
    } else {
        Err(format!("unknown duration format: {}", s))
    }
}

fn scaled(value: u64, unit_secs: u64) -> Result<Duration, String> {
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration out of range: {} x {}s", value, unit_secs))
}

/// Same format for `Option<Duration>` fields.
pub mod option {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => super::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wrapper(#[serde(with = "crate::pipeline::duration_serde")] Duration);

        Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(d)| d))
    }
}
