use serde_json::Value;
use tracing::{info, warn};

use devtwin_common::{HandlerOutcome, TwinEngine};

/// Registers the handler set the firmware exposes to the hub.
///
/// Hardware integration point: the log lines stand in for screen, audio,
/// LED and IR output on device targets.
pub fn register_defaults(engine: &mut TwinEngine) {
    register_command(engine, "message", cloud_message);
    register_command(engine, "rainbow", rainbow);

    register_desired(engine, "fanSpeed", fan_speed);
    register_desired(engine, "setVoltage", set_voltage);
    register_desired(engine, "setCurrent", set_current);
    register_desired(engine, "activateIR", activate_ir);
}

fn register_command(
    engine: &mut TwinEngine,
    name: &str,
    handler: fn(Option<&Value>) -> HandlerOutcome,
) {
    if let Err(err) = engine.register_command(name, Box::new(handler)) {
        warn!("skipping command handler {name}: {err}");
    }
}

fn register_desired(
    engine: &mut TwinEngine,
    name: &str,
    handler: fn(Option<&Value>) -> HandlerOutcome,
) {
    if let Err(err) = engine.register_desired_property(name, Box::new(handler)) {
        warn!("skipping desired-property handler {name}: {err}");
    }
}

fn cloud_message(payload: Option<&Value>) -> HandlerOutcome {
    let text = payload
        .and_then(|p| p.get("text"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    info!("cloud to device message: {text}");
    HandlerOutcome::completed()
}

fn rainbow(payload: Option<&Value>) -> HandlerOutcome {
    let cycles = payload
        .and_then(|p| p.get("cycles"))
        .and_then(Value::as_i64)
        .unwrap_or(1);
    info!("cycling the rgb led {cycles} times");
    HandlerOutcome::completed()
}

fn fan_speed(value: Option<&Value>) -> HandlerOutcome {
    info!("fanSpeed desired property changed to {}", render(value));
    HandlerOutcome::completed()
}

fn set_voltage(value: Option<&Value>) -> HandlerOutcome {
    info!("setVoltage desired property changed to {}", render(value));
    HandlerOutcome::completed()
}

fn set_current(value: Option<&Value>) -> HandlerOutcome {
    info!("setCurrent desired property changed to {}", render(value));
    HandlerOutcome::completed()
}

fn activate_ir(_value: Option<&Value>) -> HandlerOutcome {
    info!("activateIR desired property fired; transmitting ir beam");
    HandlerOutcome::completed()
}

fn render(value: Option<&Value>) -> String {
    value.map(Value::to_string).unwrap_or_else(|| "null".into())
}
