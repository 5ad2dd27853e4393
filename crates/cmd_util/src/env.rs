use std::{
    env,
    fmt::Debug,
    io,
    str::FromStr,
    time::Duration,
};

use tracing::{
    Level,
    Subscriber,
};
use tracing_subscriber::{
    fmt::{
        format::format,
        MakeWriter,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

/// Read a knob from the environment, falling back to `default` if the variable
/// is unset or doesn't parse.
pub fn env_config<T: Debug + FromStr>(name: &str, default: T) -> T
where
    <T as FromStr>::Err: Debug,
{
    let var_s = match env::var(name) {
        Ok(s) => s,
        Err(env::VarError::NotPresent) => return default,
        Err(env::VarError::NotUnicode(..)) => {
            tracing::warn!("Invalid value for {name}, falling back to {default:?}.");
            return default;
        },
    };
    match T::from_str(&var_s) {
        Ok(v) => {
            tracing::info!("Overriding {name} to {v:?} from environment");
            v
        },
        Err(e) => {
            tracing::warn!("Invalid value {var_s} for {name}, falling back to {default:?}: {e:?}");
            default
        },
    }
}

/// Millisecond knob that may be disabled with a non-positive value. Returns
/// `Duration::ZERO` when disabled.
pub fn env_config_millis(name: &str, default_ms: i64) -> Duration {
    let ms = env_config(name, default_ms);
    if ms <= 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(ms as u64)
}

/// Call this from scripts at startup.
pub fn config_tool() {
    config_tracing(io::stderr, Level::ERROR)
}

/// Call this from services at startup.
pub fn config_service() {
    config_tracing(io::stdout, Level::INFO)
}

fn config_tracing<W>(writer: W, level: Level)
where
    W: Send + Sync + for<'writer> MakeWriter<'writer> + 'static,
{
    tracing_subscriber::registry()
        .with(format_layer(writer, level))
        .init();
}

/// Formatting layer honoring `LOG_FORMAT`, `NO_COLOR` and `RUST_LOG`, falling
/// back to `level` when `RUST_LOG` is unset.
fn format_layer<S, W>(writer: W, level: Level) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span> + 'static,
    W: Send + Sync + for<'writer> MakeWriter<'writer> + 'static,
{
    let color_disabled = env::var("NO_COLOR").is_ok();
    let format_layer = tracing_subscriber::fmt::layer()
        .with_ansi(!color_disabled)
        .with_writer(writer);
    let format_layer = match env::var("LOG_FORMAT") {
        Ok(s) if s == "json" => format_layer.event_format(format().json()).boxed(),
        Ok(s) if s == "pretty" => format_layer.event_format(format().pretty()).boxed(),
        _ => format_layer.event_format(format().compact()).boxed(),
    };
    format_layer
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str())),
        )
        .boxed()
}

pub fn config_test() {
    // Ok if this fails: another test in the same binary already installed it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .compact()
        .try_init();
}
