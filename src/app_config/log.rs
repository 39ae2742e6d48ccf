use std::env;

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

// 文件写入的后台 worker guard 必须活到进程结束，否则日志丢失
static LOG_GUARDS: OnceCell<Vec<WorkerGuard>> = OnceCell::new();

fn timer() -> fmt::time::ChronoLocal {
    // 毫秒级时间戳
    fmt::time::ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string())
}

// 设置日志：LOCAL 只打控制台；其他环境控制台 + 按日滚动文件
pub fn setup_logging() -> anyhow::Result<()> {
    let app_env = env::var("APP_ENV").unwrap_or_default();

    if app_env.eq_ignore_ascii_case("local") {
        let subscriber = Registry::default().with(
            fmt::layer()
                .with_ansi(true)
                .with_target(true)
                .with_timer(timer())
                .with_writer(std::io::stdout)
                .with_filter(EnvFilter::from_default_env().add_directive("info".parse()?)),
        );
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let info_file = RollingFileAppender::new(Rotation::DAILY, "log", "runner.log");
        let error_file = RollingFileAppender::new(Rotation::DAILY, "log", "runner_error.log");

        let (info_non_blocking, info_guard) = tracing_appender::non_blocking(info_file);
        let (error_non_blocking, error_guard) = tracing_appender::non_blocking(error_file);

        let subscriber = Registry::default()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_timer(timer())
                    .with_writer(std::io::stdout)
                    .with_filter(EnvFilter::new("info")),
            )
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_timer(timer())
                    .with_writer(info_non_blocking)
                    .with_filter(EnvFilter::new("info")),
            )
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_timer(timer())
                    .with_writer(error_non_blocking)
                    .with_filter(EnvFilter::new("error")),
            );

        tracing::subscriber::set_global_default(subscriber)?;
        let _ = LOG_GUARDS.set(vec![info_guard, error_guard]);
    }

    Ok(())
}
