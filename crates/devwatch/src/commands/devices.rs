//! Device list command handlers.

use serde_json::Value;
use tabled::Tabled;

use devwatch_api::DeviceRecord;
use devwatch_core::TrackerConfig;

use crate::cli::{DevicesArgs, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Phone")]
    phone: String,
    #[tabled(rename = "Device ID")]
    device_id: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Last Updated")]
    last_updated: String,
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(String::from)
}

fn last_updated(d: &DeviceRecord) -> String {
    match &d.last_updated {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "-".into(),
    }
}

impl From<&DeviceRecord> for DeviceRow {
    fn from(d: &DeviceRecord) -> Self {
        Self {
            phone: d.phone_number.clone(),
            device_id: d.device_id.clone().unwrap_or_else(|| "-".into()),
            model: text_field(&d.device_details, "model")
                .or_else(|| text_field(&d.device_details, "deviceModel"))
                .unwrap_or_else(|| "-".into()),
            last_updated: last_updated(d),
        }
    }
}

fn detail(d: &DeviceRecord) -> String {
    [
        format!("Phone:        {}", d.phone_number),
        format!("Device ID:    {}", d.device_id.as_deref().unwrap_or("-")),
        format!("Last Updated: {}", last_updated(d)),
        String::new(),
        "Details".into(),
        output::render_fields(&d.device_details),
        String::new(),
        "Telemetry".into(),
        output::render_fields(&d.latest_telemetry),
    ]
    .join("\n")
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    config: &TrackerConfig,
    args: DevicesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let backend = config::build_backend(config)?;

    let out = if let Some(phone) = args.phone {
        let device = backend
            .find_device(&phone)
            .await?
            .ok_or_else(|| CliError::NotFound {
                resource_type: "device".into(),
                identifier: phone.clone(),
                list_command: "devices".into(),
            })?;
        output::render_single(&global.output, &device, detail, |d| d.phone_number.clone())
    } else {
        let devices = backend.list_devices().await?;
        output::render_list(
            &global.output,
            &devices,
            |d| DeviceRow::from(d),
            |d| d.phone_number.clone(),
        )
    };

    output::print_output(&out, global.quiet);
    Ok(())
}
