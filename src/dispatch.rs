//! Maps one host request to one engine operation
//!
//! Every request produces an [`OperationResponse`]: a result code plus
//! optional JSON result and error payloads. Engine errors never escape as
//! `Err`; they become the error payload.

use crate::ui;
use lcm_engine::{
    CheckFlags, ConfigurationReport, Document, Error, Lcm, MetaConfiguration, OperationKind,
};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::PathBuf;

/// One request to the configuration manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetConfiguration { document: Option<PathBuf> },
    TestConfiguration,
    PerformInventory,
    PerformInventoryOob { document: PathBuf },
    SendConfiguration { document: PathBuf, force: bool },
    SendConfigurationApply { document: PathBuf, force: bool },
    ApplyConfiguration,
    RollBack,
    PerformRequiredConfigurationChecks { flags: u32 },
    StopConfiguration { force: bool },
    SendMetaConfigurationApply { document: PathBuf },
    GetMetaConfiguration,
}

impl Request {
    pub fn operation(&self) -> OperationKind {
        match self {
            Self::GetConfiguration { .. } => OperationKind::GetConfiguration,
            Self::TestConfiguration => OperationKind::TestConfiguration,
            Self::PerformInventory => OperationKind::PerformInventory,
            Self::PerformInventoryOob { .. } => OperationKind::PerformInventoryOOB,
            Self::SendConfiguration { .. } => OperationKind::SendConfiguration,
            Self::SendConfigurationApply { .. } => OperationKind::SendConfigurationApply,
            Self::ApplyConfiguration => OperationKind::ApplyConfiguration,
            Self::RollBack => OperationKind::RollBack,
            Self::PerformRequiredConfigurationChecks { .. } => {
                OperationKind::PerformRequiredConfigurationChecks
            }
            Self::StopConfiguration { .. } => OperationKind::StopConfiguration,
            Self::SendMetaConfigurationApply { .. } => OperationKind::SendMetaConfigurationApply,
            Self::GetMetaConfiguration => OperationKind::GetMetaConfiguration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResultCode {
    Ok,
    Failed,
}

/// What the host reports back for one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResponse {
    pub operation: OperationKind,
    pub code: ResultCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// Full report, for operations that produce one
    #[serde(skip)]
    pub report: Option<ConfigurationReport>,
}

impl OperationResponse {
    fn ok(operation: OperationKind, result: Option<Value>) -> Self {
        Self {
            operation,
            code: ResultCode::Ok,
            result,
            error: None,
            report: None,
        }
    }

    fn failed(operation: OperationKind, error: &Error) -> Self {
        Self {
            operation,
            code: ResultCode::Failed,
            result: None,
            error: Some(error_payload(operation, error)),
            report: None,
        }
    }

    fn from_report(operation: OperationKind, report: ConfigurationReport) -> Self {
        let result = match serde_json::to_value(&report) {
            Ok(value) => value,
            Err(e) => return Self::failed(operation, &Error::from(e)),
        };
        let mut response = match report.clone().into_result() {
            Ok(_) => Self::ok(operation, Some(result)),
            Err(e) => Self {
                result: Some(result),
                ..Self::failed(operation, &e)
            },
        };
        response.report = Some(report);
        response
    }

    pub fn is_ok(&self) -> bool {
        self.code == ResultCode::Ok
    }

    /// Process exit code for this response
    pub fn exit_code(&self) -> u8 {
        match self.code {
            ResultCode::Ok => 0,
            ResultCode::Failed => 1,
        }
    }
}

/// Error payload: operation name, error kind, resource key, detail
pub fn error_payload(operation: OperationKind, error: &Error) -> Value {
    json!({
        "operation": operation.as_str(),
        "kind": error.kind().as_str(),
        "resource": error.resource_key(),
        "detail": error.to_string(),
    })
}

/// Run one request against the manager
pub fn dispatch(lcm: &Lcm, request: &Request) -> OperationResponse {
    let operation = request.operation();
    log::debug!("Dispatching {operation}");

    match run(lcm, request) {
        Ok(Reply::Report(report)) => OperationResponse::from_report(operation, report),
        Ok(Reply::Value(value)) => OperationResponse::ok(operation, value),
        Err(e) => {
            log::debug!("{operation} failed: {e}");
            OperationResponse::failed(operation, &e)
        }
    }
}

enum Reply {
    Report(ConfigurationReport),
    Value(Option<Value>),
}

fn run(lcm: &Lcm, request: &Request) -> lcm_engine::Result<Reply> {
    let reply = match request {
        Request::GetConfiguration { document } => {
            let document = document.as_deref().map(Document::load).transpose()?;
            Reply::Report(lcm.get_configuration(document)?)
        }
        Request::TestConfiguration => Reply::Report(lcm.test_configuration()?),
        Request::PerformInventory => Reply::Report(lcm.perform_inventory()?),
        Request::PerformInventoryOob { document } => {
            Reply::Report(lcm.perform_inventory_oob(Document::load(document)?)?)
        }
        Request::SendConfiguration { document, force } => {
            let staged = lcm.send_configuration(Document::load(document)?, *force)?;
            Reply::Value(Some(json!({
                "configuration": staged.name(),
                "resources": staged.len(),
            })))
        }
        Request::SendConfigurationApply { document, force } => {
            Reply::Report(lcm.send_configuration_apply(Document::load(document)?, *force)?)
        }
        Request::ApplyConfiguration => Reply::Report(lcm.apply_configuration()?),
        Request::RollBack => Reply::Report(lcm.roll_back()?),
        Request::PerformRequiredConfigurationChecks { flags } => Reply::Report(
            lcm.perform_required_configuration_checks(CheckFlags::from_bits(*flags))?,
        ),
        Request::StopConfiguration { force } => {
            let stopped = lcm.stop_configuration(*force)?;
            Reply::Value(Some(json!({ "stopped": stopped })))
        }
        Request::SendMetaConfigurationApply { document } => {
            lcm.send_meta_configuration_apply(MetaConfiguration::load(document)?)?;
            Reply::Value(None)
        }
        Request::GetMetaConfiguration => {
            let meta = lcm.get_meta_configuration()?;
            Reply::Value(Some(serde_json::to_value(meta.as_ref())?))
        }
    };
    Ok(reply)
}

/// Print a response the way the host reports it
pub fn print_response(response: &OperationResponse, json_output: bool) {
    if json_output {
        match serde_json::to_string_pretty(response) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => ui::error(&format!("Failed to render response: {e}")),
        }
        return;
    }

    if let Some(report) = &response.report {
        ui::print_report(report);
    } else if let Some(result) = &response.result {
        match serde_json::to_string_pretty(result) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => ui::error(&format!("Failed to render result: {e}")),
        }
    }

    if response.is_ok() {
        ui::success(&format!(
            "Operation {} completed successfully.",
            response.operation
        ));
    } else {
        ui::error(&format!("Error occurred during operation {}.", response.operation));
        if let Some(error) = &response.error {
            if let Some(detail) = error.get("detail").and_then(Value::as_str) {
                ui::error(detail);
            }
            if let Some(kind) = error.get("kind").and_then(Value::as_str) {
                ui::dim(&format!("kind: {kind}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::FileProvider;
    use lcm_engine::{NoEvents, ProviderRegistry, RunStatus, SnapshotStore};
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register("File", || Ok(Box::new(FileProvider)));
        registry
    }

    fn lcm() -> Lcm {
        Lcm::builder()
            .registry(registry())
            .events(Arc::new(NoEvents))
            .build()
    }

    /// What one `lcm` invocation builds
    fn host(state_dir: &Path) -> Lcm {
        Lcm::builder()
            .registry(registry())
            .store(SnapshotStore::open(state_dir).unwrap())
            .events(Arc::new(NoEvents))
            .build()
    }

    fn write_document(dir: &TempDir, target: &str) -> PathBuf {
        let path = dir.path().join("motd.toml");
        let content = format!(
            r#"
[configuration]
name = "Motd"

[[resource]]
type = "File"
name = "motd"
[resource.properties]
path = "{target}"
contents = "hello"
"#
        );
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_request_operation_names() {
        let request = Request::PerformInventoryOob {
            document: PathBuf::from("x.toml"),
        };
        assert_eq!(request.operation(), OperationKind::PerformInventoryOOB);
        assert_eq!(
            Request::StopConfiguration { force: true }.operation(),
            OperationKind::StopConfiguration
        );
    }

    #[test]
    fn test_send_apply_then_test() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("motd");
        let document = write_document(&dir, &target.to_string_lossy());
        let lcm = lcm();

        let response = dispatch(
            &lcm,
            &Request::SendConfigurationApply {
                document,
                force: false,
            },
        );
        assert!(response.is_ok());
        assert_eq!(response.exit_code(), 0);
        assert_eq!(fs::read_to_string(&target).unwrap(), "hello");
        assert_eq!(response.report.as_ref().unwrap().status, RunStatus::Completed);

        let tested = dispatch(&lcm, &Request::TestConfiguration);
        assert!(tested.is_ok());
        assert_eq!(tested.result.unwrap()["in_desired_state"], json!(true));
    }

    #[test]
    fn test_separate_invocations_share_state() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("state");
        let target = dir.path().join("motd");
        let document = write_document(&dir, &target.to_string_lossy());

        let sent = dispatch(
            &host(&state),
            &Request::SendConfiguration {
                document,
                force: false,
            },
        );
        assert!(sent.is_ok());

        let applied = dispatch(&host(&state), &Request::ApplyConfiguration);
        assert!(applied.is_ok());
        assert_eq!(fs::read_to_string(&target).unwrap(), "hello");

        let stopped = dispatch(&host(&state), &Request::StopConfiguration { force: false });
        assert_eq!(stopped.result.unwrap()["stopped"], json!(false));

        let tested = dispatch(&host(&state), &Request::TestConfiguration);
        assert_eq!(tested.result.unwrap()["in_desired_state"], json!(true));
    }

    #[test]
    fn test_missing_current_is_failed_response() {
        let response = dispatch(&lcm(), &Request::TestConfiguration);
        assert!(!response.is_ok());
        assert_eq!(response.exit_code(), 1);
        let _: std::process::ExitCode = response.exit_code().into();
        let error = response.error.unwrap();
        assert_eq!(error["operation"], json!("TestConfiguration"));
        assert_eq!(error["kind"], json!("NoCurrentConfiguration"));
        assert_eq!(error["resource"], Value::Null);
    }

    #[test]
    fn test_roll_back_without_history() {
        let response = dispatch(&lcm(), &Request::RollBack);
        assert_eq!(
            response.error.unwrap()["kind"],
            json!("NoPreviousConfiguration")
        );
    }

    #[test]
    fn test_unparseable_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[[resource]\n").unwrap();

        let response = dispatch(&lcm(), &Request::SendConfiguration {
            document: path,
            force: false,
        });
        assert_eq!(response.error.unwrap()["kind"], json!("ParseError"));
    }

    #[test]
    fn test_failed_resource_reports_key_and_keeps_result() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("svc.json");
        fs::write(
            &path,
            r#"{"resource": [{"type": "Package", "name": "nginx"}]}"#,
        )
        .unwrap();

        let response = dispatch(&lcm(), &Request::SendConfigurationApply {
            document: path,
            force: false,
        });
        assert!(!response.is_ok());
        assert!(response.result.is_some());
        let error = response.error.unwrap();
        assert_eq!(error["kind"], json!("ProviderNotFound"));
        assert_eq!(error["resource"], json!("[Package]nginx"));
    }

    #[test]
    fn test_stop_without_run() {
        let response = dispatch(&lcm(), &Request::StopConfiguration { force: false });
        assert!(response.is_ok());
        assert_eq!(response.result.unwrap()["stopped"], json!(false));
    }

    #[test]
    fn test_meta_configuration_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.toml");
        fs::write(
            &path,
            "configuration_mode = \"ApplyAndMonitor\"\nreboot_node_if_needed = true\n",
        )
        .unwrap();
        let lcm = lcm();

        let applied = dispatch(&lcm, &Request::SendMetaConfigurationApply { document: path });
        assert!(applied.is_ok());
        assert!(applied.result.is_none());

        let meta = dispatch(&lcm, &Request::GetMetaConfiguration);
        let result = meta.result.unwrap();
        assert_eq!(result["configuration_mode"], json!("ApplyAndMonitor"));
        assert_eq!(result["reboot_node_if_needed"], json!(true));
    }

    #[test]
    fn test_invalid_meta_configuration() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.json");
        fs::write(&path, r#"{"refresh_frequency_mins": 5}"#).unwrap();

        let response = dispatch(&lcm(), &Request::SendMetaConfigurationApply { document: path });
        assert_eq!(
            response.error.unwrap()["kind"],
            json!("InvalidMetaConfiguration")
        );
    }

    #[test]
    fn test_response_serializes_without_report() {
        let response = dispatch(&lcm(), &Request::StopConfiguration { force: true });
        let rendered = serde_json::to_value(&response).unwrap();
        assert_eq!(rendered["code"], json!("Ok"));
        assert_eq!(rendered["operation"], json!("StopConfiguration"));
        assert!(rendered.get("report").is_none());
        assert!(rendered.get("error").is_none());
    }
}
