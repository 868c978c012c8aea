use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::datatype::tuf::Signature;

/// Outcome code an ECU reports for a completed (or failed) install,
/// following the Uptane-defined numeric space.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallCode {
    Ok = 0,
    AlreadyProcessed = 1,
    DependencyFailure = 2,
    ValidationFailed = 3,
    VerificationFailed = 19,
    InternalError = 99,
    GeneralError = 18,
}

/// The result an ECU attaches to its manifest after attempting an install.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OperationResult {
    pub id: String,
    #[serde(rename = "result_code")]
    pub result_code: InstallCode,
    #[serde(rename = "result_text")]
    pub result_text: String,
}

/// The version currently installed on an ECU, used both in the manifest
/// and when checking for rollback.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InstalledVersion {
    pub filepath: String,
    pub length: u64,
    pub hashes: HashMap<String, String>,
}

/// Custom fields on an ECU's signed version report.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EcuCustom {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_result: Option<OperationResult>,
}

/// The signed body an ECU produces each cycle, reporting its currently
/// installed image and (if one just ran) the result of the last install.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EcuVersion {
    pub attacks_detected: String,
    pub ecu_serial: String,
    pub previous_timeserver_time: String,
    pub timeserver_time: String,
    pub installed_image: InstalledVersion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<EcuCustom>,
}

/// A signed `{signed, signatures}` envelope wrapping one ECU's version
/// report, as submitted inside the primary's manifest.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EcuManifest {
    pub signed: EcuVersion,
    pub signatures: Vec<Signature>,
}
