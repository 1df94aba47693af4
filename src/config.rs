//! 计算引擎配置
//!
//! 启动时解析一次，进程生命周期内不可变。时长类配置统一以毫秒为单位。

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::Serialize;

pub const WORKER_COUNT_PROPERTY: &str = "ce.workerCount";
pub const CLEAN_TASKS_INITIAL_DELAY_PROPERTY: &str = "ce.cleanTasksInitialDelay";
pub const CLEAN_TASKS_DELAY_PROPERTY: &str = "ce.cleanTasksDelay";
pub const WORN_OUT_THRESHOLD_PROPERTY: &str = "ce.wornOutThreshold";
pub const GRACEFUL_STOP_TIMEOUT_PROPERTY: &str = "ce.gracefulStopTimeout";

/// 属性名与环境变量的对应关系
const ENV_VARS: [(&str, &str); 5] = [
    (WORKER_COUNT_PROPERTY, "CE_WORKER_COUNT"),
    (CLEAN_TASKS_INITIAL_DELAY_PROPERTY, "CE_CLEAN_TASKS_INITIAL_DELAY"),
    (CLEAN_TASKS_DELAY_PROPERTY, "CE_CLEAN_TASKS_DELAY"),
    (WORN_OUT_THRESHOLD_PROPERTY, "CE_WORN_OUT_THRESHOLD"),
    (GRACEFUL_STOP_TIMEOUT_PROPERTY, "CE_GRACEFUL_STOP_TIMEOUT"),
];

const DEFAULT_WORKER_COUNT: usize = 1;
const DEFAULT_QUEUE_POLLING_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_CLEAN_TASKS_INITIAL_DELAY: Duration = Duration::from_secs(60);
const DEFAULT_CLEAN_TASKS_DELAY: Duration = Duration::from_secs(10 * 60);
const DEFAULT_WORN_OUT_THRESHOLD: Duration = Duration::from_secs(6 * 60 * 60);
const DEFAULT_GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

/// 工作槽被禁用时的轮询间隔倍数
const DISABLED_POLLING_FACTOR: u32 = 10;

/// 配置错误，必须中止节点启动
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("value '{value}' of property {property} is invalid. Must be an integer strictly greater than 0.")]
    InvalidWorkerCount { property: String, value: String },

    #[error("value '{value}' of property {property} is invalid. Must be a number of milliseconds.")]
    InvalidDuration { property: String, value: String },

    #[error("value of property {property} must be strictly greater than 0")]
    ZeroDuration { property: String },

    #[error("value '{value}' of property {property} is too large")]
    DurationOutOfRange { property: String, value: String },
}

/// 引擎运行配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineConfig {
    worker_count: usize,
    queue_polling_delay: Duration,
    clean_tasks_initial_delay: Duration,
    clean_tasks_delay: Duration,
    worn_out_threshold: Duration,
    graceful_stop_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            queue_polling_delay: DEFAULT_QUEUE_POLLING_DELAY,
            clean_tasks_initial_delay: DEFAULT_CLEAN_TASKS_INITIAL_DELAY,
            clean_tasks_delay: DEFAULT_CLEAN_TASKS_DELAY,
            worn_out_threshold: DEFAULT_WORN_OUT_THRESHOLD,
            graceful_stop_timeout: DEFAULT_GRACEFUL_STOP_TIMEOUT,
        }
    }
}

impl EngineConfig {
    /// 从属性表解析配置
    ///
    /// 缺失或空字符串取默认值，其它非法值一律返回 [`ConfigError`]。
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let raw = |key: &str| properties.get(key).map(String::as_str);

        let defaults = Self::default();
        let config = Self {
            worker_count: parse_worker_count(raw(WORKER_COUNT_PROPERTY))?,
            clean_tasks_initial_delay: parse_duration(
                CLEAN_TASKS_INITIAL_DELAY_PROPERTY,
                raw(CLEAN_TASKS_INITIAL_DELAY_PROPERTY),
                defaults.clean_tasks_initial_delay,
            )?,
            clean_tasks_delay: parse_positive_duration(
                CLEAN_TASKS_DELAY_PROPERTY,
                raw(CLEAN_TASKS_DELAY_PROPERTY),
                defaults.clean_tasks_delay,
            )?,
            worn_out_threshold: check_task_age(parse_positive_duration(
                WORN_OUT_THRESHOLD_PROPERTY,
                raw(WORN_OUT_THRESHOLD_PROPERTY),
                defaults.worn_out_threshold,
            )?)?,
            graceful_stop_timeout: parse_duration(
                GRACEFUL_STOP_TIMEOUT_PROPERTY,
                raw(GRACEFUL_STOP_TIMEOUT_PROPERTY),
                defaults.graceful_stop_timeout,
            )?,
            ..defaults
        };

        log::debug!("Compute engine configuration: {:?}", config);
        Ok(config)
    }

    /// 从环境变量解析配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let properties = ENV_VARS
            .iter()
            .filter_map(|(property, var)| {
                env::var(var).ok().map(|value| (property.to_string(), value))
            })
            .collect::<HashMap<_, _>>();
        Self::from_properties(&properties)
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Result<Self, ConfigError> {
        if worker_count == 0 {
            return Err(ConfigError::InvalidWorkerCount {
                property: WORKER_COUNT_PROPERTY.to_string(),
                value: worker_count.to_string(),
            });
        }
        self.worker_count = worker_count;
        Ok(self)
    }

    /// 轮询间隔不开放给用户配置，仅供测试覆盖
    pub fn with_queue_polling_delay(mut self, delay: Duration) -> Self {
        self.queue_polling_delay = delay;
        self
    }

    pub fn with_clean_tasks_delays(
        mut self,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<Self, ConfigError> {
        if delay.is_zero() {
            return Err(ConfigError::ZeroDuration {
                property: CLEAN_TASKS_DELAY_PROPERTY.to_string(),
            });
        }
        self.clean_tasks_initial_delay = initial_delay;
        self.clean_tasks_delay = delay;
        Ok(self)
    }

    pub fn with_worn_out_threshold(mut self, threshold: Duration) -> Result<Self, ConfigError> {
        if threshold.is_zero() {
            return Err(ConfigError::ZeroDuration {
                property: WORN_OUT_THRESHOLD_PROPERTY.to_string(),
            });
        }
        self.worn_out_threshold = check_task_age(threshold)?;
        Ok(self)
    }

    pub fn with_graceful_stop_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_stop_timeout = timeout;
        self
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn queue_polling_delay(&self) -> Duration {
        self.queue_polling_delay
    }

    /// 工作槽被禁用时使用的加长轮询间隔
    pub fn disabled_polling_delay(&self) -> Duration {
        self.queue_polling_delay * DISABLED_POLLING_FACTOR
    }

    pub fn clean_tasks_initial_delay(&self) -> Duration {
        self.clean_tasks_initial_delay
    }

    pub fn clean_tasks_delay(&self) -> Duration {
        self.clean_tasks_delay
    }

    pub fn worn_out_threshold(&self) -> Duration {
        self.worn_out_threshold
    }

    pub fn graceful_stop_timeout(&self) -> Duration {
        self.graceful_stop_timeout
    }
}

fn parse_worker_count(raw: Option<&str>) -> Result<usize, ConfigError> {
    let value = match raw.map(str::trim) {
        None | Some("") => return Ok(DEFAULT_WORKER_COUNT),
        Some(value) => value,
    };

    match value.parse::<i64>() {
        Ok(count) if count > 0 => usize::try_from(count).map_err(|_| invalid_worker_count(value)),
        _ => Err(invalid_worker_count(value)),
    }
}

fn invalid_worker_count(value: &str) -> ConfigError {
    ConfigError::InvalidWorkerCount {
        property: WORKER_COUNT_PROPERTY.to_string(),
        value: value.to_string(),
    }
}

fn parse_duration(
    property: &str,
    raw: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidDuration {
                property: property.to_string(),
                value: value.to_string(),
            }),
    }
}

fn parse_positive_duration(
    property: &str,
    raw: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let duration = parse_duration(property, raw, default)?;
    if duration.is_zero() {
        return Err(ConfigError::ZeroDuration {
            property: property.to_string(),
        });
    }
    Ok(duration)
}

/// 超时阈值要与任务时间戳比较，必须能用 chrono 表示
fn check_task_age(threshold: Duration) -> Result<Duration, ConfigError> {
    chrono::Duration::from_std(threshold)
        .map(|_| threshold)
        .map_err(|_| ConfigError::DurationOutOfRange {
            property: WORN_OUT_THRESHOLD_PROPERTY.to_string(),
            value: threshold.as_millis().to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn blank_worker_count_falls_back_to_default() {
        let config = EngineConfig::from_properties(&props(&[(WORKER_COUNT_PROPERTY, "  ")])).unwrap();
        assert_eq!(config.worker_count(), 1);
    }

    #[test]
    fn durations_are_read_as_milliseconds() {
        let config = EngineConfig::from_properties(&props(&[
            (CLEAN_TASKS_INITIAL_DELAY_PROPERTY, "0"),
            (CLEAN_TASKS_DELAY_PROPERTY, "1500"),
        ]))
        .unwrap();
        assert_eq!(config.clean_tasks_initial_delay(), Duration::ZERO);
        assert_eq!(config.clean_tasks_delay(), Duration::from_millis(1500));
    }

    #[test]
    fn zero_cleaning_delay_is_rejected() {
        let err = EngineConfig::from_properties(&props(&[(CLEAN_TASKS_DELAY_PROPERTY, "0")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::ZeroDuration {
                property: CLEAN_TASKS_DELAY_PROPERTY.to_string()
            }
        );
    }

    #[test]
    fn disabled_polling_delay_is_ten_times_regular_delay() {
        let config = EngineConfig::default().with_queue_polling_delay(Duration::from_millis(5));
        assert_eq!(config.disabled_polling_delay(), Duration::from_millis(50));
    }
}
