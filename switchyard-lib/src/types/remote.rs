use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The structured error body a server sends along with a 4xx/5xx status.
///
/// ```
/// use switchyard_lib::SerializableError;
///
/// let body = r#"{
///     "errorCode": "NOT_FOUND",
///     "errorName": "Billing:InvoiceNotFound",
///     "errorInstanceId": "00000000-0000-0000-0000-000000000000",
///     "parameters": {"invoiceId": "42"}
/// }"#;
/// let error: SerializableError = serde_json::from_str(body).unwrap();
/// assert_eq!(error.error_name, "Billing:InvoiceNotFound");
/// assert_eq!(error.parameters["invoiceId"], "42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializableError {
    /// Broad error class, e.g. `INVALID_ARGUMENT`
    pub error_code: String,
    /// Namespaced error name, e.g. `Billing:InvoiceNotFound`
    pub error_name: String,
    /// Unique identifier of this error occurrence
    #[serde(default)]
    pub error_instance_id: String,
    /// Safe-to-log parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl fmt::Display for SerializableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, instance {})",
            self.error_name, self.error_code, self.error_instance_id
        )
    }
}
