use serde_json::Value;

/// SchemaValidator defines the port the `json` middleware validates bodies with
pub trait SchemaValidator: Send + Sync + 'static {
    /// Validates a parsed body, `None` when the request had no body.
    ///
    /// The returned value replaces the parsed one, which lets a validator
    /// strip or normalize fields. The error text is sent to the client.
    fn validate(&self, value: Option<&Value>) -> Result<Value, String>;
}
