//! 🏗️ The build record, as the build service serves it in JSON form.
//!
//! int64 ids arrive as strings (protojson) or numbers (hand-written fixtures), statuses
//! as symbols or numbers, timestamps as RFC 3339. Both camelCase and snake_case keys parse.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::codec::structured::{Kind, StructValue};

/// 🏗️ One build. `Default` is the empty build, which transforms refuse.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Build {
    #[serde(with = "int64_string")]
    pub id: i64,
    pub status: BuildStatus,
    #[serde(alias = "create_time", skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(alias = "start_time", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(alias = "end_time", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<BuildProperties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<BuildProperties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infra: Option<BuildInfra>,
}

/// 📦 Input and output share a shape: a structured property bag.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<StructValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildInfra {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swarming: Option<SwarmingInfra>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SwarmingInfra {
    #[serde(alias = "bot_dimensions")]
    pub bot_dimensions: Vec<StringPair>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StringPair {
    pub key: String,
    pub value: String,
}

impl Build {
    /// 🕳️ True for the all-defaults build. Nothing useful can come of one.
    pub fn is_empty(&self) -> bool {
        *self == Build::default()
    }

    pub fn input_properties(&self) -> Option<&StructValue> {
        self.input.as_ref().and_then(|input| input.properties.as_ref())
    }

    pub fn output_properties(&self) -> Option<&StructValue> {
        self.output.as_ref().and_then(|output| output.properties.as_ref())
    }

    /// 🔤 A string-valued output property by name. `None` when there are no output
    /// properties, the key is missing, or the value isn't a string.
    pub fn output_string(&self, name: &str) -> Option<&str> {
        match &self.output_properties()?.kind {
            Some(Kind::Struct(fields)) => fields.get(name).and_then(StructValue::as_str),
            _ => None,
        }
    }

    /// 🤖 First bot dimension value for `key`.
    pub fn bot_dimension(&self, key: &str) -> Option<&str> {
        self.infra
            .as_ref()
            .and_then(|infra| infra.swarming.as_ref())
            .and_then(|swarming| swarming.bot_dimensions.iter().find(|dim| dim.key == key))
            .map(|dim| dim.value.as_str())
    }
}

/// 🚦 Build status. Every value carrying the `ENDED_MASK` bit is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BuildStatus {
    #[default]
    Unspecified,
    Scheduled,
    Started,
    EndedMask,
    Success,
    Failure,
    InfraFailure,
    Canceled,
}

const ENDED_MASK: i32 = 4;

impl BuildStatus {
    const ALL: [BuildStatus; 8] = [
        BuildStatus::Unspecified,
        BuildStatus::Scheduled,
        BuildStatus::Started,
        BuildStatus::EndedMask,
        BuildStatus::Success,
        BuildStatus::Failure,
        BuildStatus::InfraFailure,
        BuildStatus::Canceled,
    ];

    pub fn value(self) -> i32 {
        match self {
            BuildStatus::Unspecified => 0,
            BuildStatus::Scheduled => 1,
            BuildStatus::Started => 2,
            BuildStatus::EndedMask => 4,
            BuildStatus::Success => 12,
            BuildStatus::Failure => 20,
            BuildStatus::InfraFailure => 36,
            BuildStatus::Canceled => 68,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BuildStatus::Unspecified => "STATUS_UNSPECIFIED",
            BuildStatus::Scheduled => "SCHEDULED",
            BuildStatus::Started => "STARTED",
            BuildStatus::EndedMask => "ENDED_MASK",
            BuildStatus::Success => "SUCCESS",
            BuildStatus::Failure => "FAILURE",
            BuildStatus::InfraFailure => "INFRA_FAILURE",
            BuildStatus::Canceled => "CANCELED",
        }
    }

    pub fn from_value(value: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|status| i64::from(status.value()) == value)
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.symbol() == symbol)
    }

    pub fn is_terminal(self) -> bool {
        self.value() & ENDED_MASK != 0
    }
}

impl Serialize for BuildStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.symbol())
    }
}

impl<'de> Deserialize<'de> for BuildStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StatusVisitor;

        impl Visitor<'_> for StatusVisitor {
            type Value = BuildStatus;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a build status symbol or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<BuildStatus, E> {
                BuildStatus::from_symbol(v)
                    .ok_or_else(|| E::custom(format!("unknown build status {v:?}")))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<BuildStatus, E> {
                BuildStatus::from_value(v)
                    .ok_or_else(|| E::custom(format!("unknown build status {v}")))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<BuildStatus, E> {
                i64::try_from(v)
                    .ok()
                    .and_then(BuildStatus::from_value)
                    .ok_or_else(|| E::custom(format!("unknown build status {v}")))
            }

            fn visit_unit<E: de::Error>(self) -> Result<BuildStatus, E> {
                Ok(BuildStatus::default())
            }
        }

        deserializer.deserialize_any(StatusVisitor)
    }
}

/// 🔢 protojson int64: written as a string, read from a string or a number.
pub(crate) mod int64_string {
    use super::*;

    pub fn serialize<S: Serializer>(id: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(id)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = i64;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an int64 as a string or a number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
                v.parse().map_err(|_| E::custom(format!("{v:?} is not an int64")))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
                Ok(v)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
                i64::try_from(v).map_err(|_| E::custom(format!("{v} overflows int64")))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}
