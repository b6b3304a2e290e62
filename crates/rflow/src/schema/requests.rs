//! 📝 Typed views over the requests stashed in build input properties.
//!
//! Property trees arrive in protojson shape: camelCase keys (snake_case tolerated),
//! enums as symbols or numbers, and after the null-fill pass, explicit nulls wherever
//! an upstream value forgot its kind. Every container here treats null as "use the
//! default" so that pass never turns into a decode failure.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

/// 🕳️ `null` and "absent" mean the same thing to us.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// 🗺️ Plan build input properties: a tagged map of requests, or one legacy request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlanProperties {
    pub requests: Option<BTreeMap<String, TestPlatformRequest>>,
    pub request: Option<TestPlatformRequest>,
}

impl PlanProperties {
    /// 🔑 The request-keyed map, in sorted key order. A lone `request` is keyed `"default"`.
    /// `None` when the build carries neither shape.
    pub fn into_tagged(self) -> Option<BTreeMap<String, TestPlatformRequest>> {
        match (self.requests, self.request) {
            (Some(requests), _) => Some(requests),
            (None, Some(request)) => Some(BTreeMap::from([("default".to_string(), request)])),
            (None, None) => None,
        }
    }
}

/// 📝 One test platform request, narrowed to what the plan rows need.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TestPlatformRequest {
    #[serde(deserialize_with = "nullable")]
    pub params: Params,
    #[serde(alias = "test_plan", deserialize_with = "nullable")]
    pub test_plan: TestPlan,
}

impl TestPlatformRequest {
    /// 🧪 The first suite's name, or empty.
    pub fn suite_name(&self) -> &str {
        self.test_plan
            .suite
            .first()
            .map(|suite| suite.name.as_str())
            .unwrap_or_default()
    }

    pub fn build_target(&self) -> &str {
        self.params.build_target()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Params {
    #[serde(deserialize_with = "nullable")]
    pub scheduling: Scheduling,
    #[serde(alias = "software_attributes", deserialize_with = "nullable")]
    pub software_attributes: SoftwareAttributes,
    #[serde(alias = "software_dependencies", deserialize_with = "nullable")]
    pub software_dependencies: Vec<SoftwareDependency>,
}

impl Params {
    /// 🏊 Unmanaged pool when set, otherwise the managed pool's symbol.
    pub fn pool(&self) -> String {
        if self.scheduling.unmanaged_pool.is_empty() {
            self.scheduling.managed_pool.symbol()
        } else {
            self.scheduling.unmanaged_pool.clone()
        }
    }

    pub fn build_target(&self) -> &str {
        &self.software_attributes.build_target.name
    }

    /// 📀 The first dependency that names a ChromeOS build. Empty when none does.
    pub fn chromeos_build(&self) -> &str {
        self.software_dependencies
            .iter()
            .map(|dep| dep.chromeos_build.as_str())
            .find(|build| !build.is_empty())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Scheduling {
    #[serde(alias = "unmanaged_pool", deserialize_with = "nullable")]
    pub unmanaged_pool: String,
    #[serde(alias = "managed_pool", deserialize_with = "nullable")]
    pub managed_pool: ManagedPool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SoftwareAttributes {
    #[serde(alias = "build_target", deserialize_with = "nullable")]
    pub build_target: BuildTarget,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildTarget {
    #[serde(deserialize_with = "nullable")]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SoftwareDependency {
    #[serde(alias = "chromeos_build", deserialize_with = "nullable")]
    pub chromeos_build: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TestPlan {
    #[serde(deserialize_with = "nullable")]
    pub suite: Vec<Suite>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Suite {
    #[serde(deserialize_with = "nullable")]
    pub name: String,
}

/// 🏊 Managed DUT pools, as numbered upstream.
const MANAGED_POOL_SYMBOLS: [&str; 9] = [
    "MANAGED_POOL_UNSPECIFIED",
    "MANAGED_POOL_CQ",
    "MANAGED_POOL_BVT",
    "MANAGED_POOL_SUITES",
    "MANAGED_POOL_CTS",
    "MANAGED_POOL_CTS_PERBUILD",
    "MANAGED_POOL_CONTINUOUS",
    "MANAGED_POOL_ARC_PRESUBMIT",
    "MANAGED_POOL_QUOTA",
];

/// 🏊 A managed pool enum value. Deserializes from its symbol or its number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagedPool(pub i32);

impl ManagedPool {
    /// 🏷️ The symbolic name. Numbers nobody has named yet come back as digits.
    pub fn symbol(&self) -> String {
        usize::try_from(self.0)
            .ok()
            .and_then(|index| MANAGED_POOL_SYMBOLS.get(index))
            .map(|symbol| symbol.to_string())
            .unwrap_or_else(|| self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for ManagedPool {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PoolVisitor;

        impl Visitor<'_> for PoolVisitor {
            type Value = ManagedPool;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a managed pool symbol or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ManagedPool, E> {
                MANAGED_POOL_SYMBOLS
                    .iter()
                    .position(|symbol| *symbol == v)
                    .map(|index| ManagedPool(index as i32))
                    .ok_or_else(|| E::custom(format!("unknown managed pool {v:?}")))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<ManagedPool, E> {
                Ok(ManagedPool(v as i32))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<ManagedPool, E> {
                i32::try_from(v)
                    .map(ManagedPool)
                    .map_err(|_| E::custom(format!("managed pool {v} out of range")))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ManagedPool, E> {
                i32::try_from(v)
                    .map(ManagedPool)
                    .map_err(|_| E::custom(format!("managed pool {v} out of range")))
            }

            fn visit_unit<E: de::Error>(self) -> Result<ManagedPool, E> {
                Ok(ManagedPool::default())
            }
        }

        deserializer.deserialize_any(PoolVisitor)
    }
}

/// 🗺️ Runner build input properties. A missing `request` means every field is empty.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunnerProperties {
    #[serde(deserialize_with = "nullable")]
    pub request: RunnerRequest,
}

/// 📝 The single request a runner build executes.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RunnerRequest {
    #[serde(deserialize_with = "nullable")]
    pub params: Params,
    #[serde(deserialize_with = "nullable")]
    pub test: RunnerTest,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RunnerTest {
    #[serde(deserialize_with = "nullable")]
    pub autotest: AutotestSpec,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutotestSpec {
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    #[serde(alias = "display_name", deserialize_with = "nullable")]
    pub display_name: String,
}
