use std::time::Duration;

use chrono::{DateTime, Utc};

/// 模板变量
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    pub job: String,
    pub duration: String,
    pub error: String,
    pub timestamp: String,
}

impl TemplateVars {
    pub fn for_job(job_name: &str) -> Self {
        Self {
            job: job_name.to_string(),
            timestamp: format_timestamp(Utc::now()),
            ..Default::default()
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = format_duration(duration);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }
}

/// 渲染通知模板，替换 {job}/{duration}/{error}/{timestamp} 变量
pub fn render(template: &str, vars: &TemplateVars) -> String {
    template
        .replace("{job}", &vars.job)
        .replace("{duration}", &vars.duration)
        .replace("{error}", &vars.error)
        .replace("{timestamp}", &vars.timestamp)
}

/// 人类可读的时长
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_replaces_all_variables() {
        let vars = TemplateVars {
            job: "photos".to_string(),
            duration: "3m 5s".to_string(),
            error: "连接超时".to_string(),
            timestamp: "2026-08-05 03:00:00 UTC".to_string(),
        };

        let rendered = render("{job} 用时 {duration}，错误: {error} @ {timestamp}", &vars);
        assert_eq!(
            rendered,
            "photos 用时 3m 5s，错误: 连接超时 @ 2026-08-05 03:00:00 UTC"
        );
    }

    #[test]
    fn test_format_duration_bands() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(185)), "3m 5s");
        assert_eq!(format_duration(Duration::from_secs(3700)), "1h 1m 40s");
    }
}
