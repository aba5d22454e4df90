//! MCP Message Validation
//!
//! JSON schema validation for protocol envelopes, method parameters, and
//! tool arguments. Tool input/output schemas are compiled once at
//! registration time and reused for every call.

use crate::mcp::errors::{McpError, McpResult};
use crate::mcp::protocol::*;
use anyhow::{Result, anyhow};
use jsonschema::{Draft, JSONSchema};
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::debug;

/// JSON Schema validator for MCP messages
pub struct McpValidator {
    schemas: HashMap<String, JSONSchema>,
}

impl McpValidator {
    /// Create a new MCP validator with built-in schemas
    #[inline]
    pub fn new() -> Result<Self> {
        let mut validator = Self {
            schemas: HashMap::new(),
        };

        validator.load_builtin_schemas()?;

        Ok(validator)
    }

    /// Load built-in JSON schemas for MCP message types
    fn load_builtin_schemas(&mut self) -> Result<()> {
        let request_schema = json!({
            "type": "object",
            "properties": {
                "jsonrpc": {
                    "type": "string",
                    "const": "2.0"
                },
                "method": {"type": "string"},
                "params": {},
                "id": {
                    "oneOf": [
                        {"type": "string"},
                        {"type": "integer"}
                    ]
                }
            },
            "required": ["jsonrpc", "method", "id"]
        });
        self.add_schema("jsonrpc_request", &request_schema)?;

        let response_schema = json!({
            "type": "object",
            "properties": {
                "jsonrpc": {
                    "type": "string",
                    "const": "2.0"
                },
                "result": {},
                "id": {
                    "oneOf": [
                        {"type": "string"},
                        {"type": "integer"}
                    ]
                }
            },
            "required": ["jsonrpc", "result", "id"]
        });
        self.add_schema("jsonrpc_response", &response_schema)?;

        let error_response_schema = json!({
            "type": "object",
            "properties": {
                "jsonrpc": {
                    "type": "string",
                    "const": "2.0"
                },
                "error": {
                    "type": "object",
                    "properties": {
                        "code": {"type": "integer"},
                        "message": {"type": "string"},
                        "data": {}
                    },
                    "required": ["code", "message"]
                },
                "id": {
                    "oneOf": [
                        {"type": "string"},
                        {"type": "integer"},
                        {"type": "null"}
                    ]
                }
            },
            "required": ["jsonrpc", "error"]
        });
        self.add_schema("jsonrpc_error_response", &error_response_schema)?;

        let notification_schema = json!({
            "type": "object",
            "properties": {
                "jsonrpc": {
                    "type": "string",
                    "const": "2.0"
                },
                "method": {"type": "string"},
                "params": {}
            },
            "required": ["jsonrpc", "method"],
            "not": {"required": ["id"]}
        });
        self.add_schema("jsonrpc_notification", &notification_schema)?;

        let initialize_schema = json!({
            "type": "object",
            "properties": {
                "protocolVersion": {"type": "string"},
                "capabilities": {"type": "object"},
                "clientInfo": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "version": {"type": "string"}
                    },
                    "required": ["name", "version"]
                }
            },
            "required": ["protocolVersion", "capabilities", "clientInfo"]
        });
        self.add_schema("initialize_params", &initialize_schema)?;

        let tool_call_schema = json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "arguments": {"type": "object"},
                "_meta": {"type": "object"}
            },
            "required": ["name"]
        });
        self.add_schema("call_tool_params", &tool_call_schema)?;

        let set_level_schema = json!({
            "type": "object",
            "properties": {
                "level": {"type": "string"}
            },
            "required": ["level"]
        });
        self.add_schema("set_level_params", &set_level_schema)?;

        debug!("Loaded {} built-in JSON schemas", self.schemas.len());
        Ok(())
    }

    /// Add a JSON schema to the validator
    #[inline]
    pub fn add_schema(&mut self, name: &str, schema: &Value) -> Result<()> {
        let compiled = compile_schema(schema)
            .map_err(|e| anyhow!("Failed to compile schema '{}': {}", name, e))?;

        self.schemas.insert(name.to_string(), compiled);
        Ok(())
    }

    /// Validate method-specific parameters
    pub fn validate_method_params(&self, method: &str, params: &Value) -> Result<()> {
        let schema_name = match method {
            "initialize" => "initialize_params",
            "tools/call" => "call_tool_params",
            "logging/setLevel" => "set_level_params",
            _ => {
                debug!("No parameter validation schema for method: {}", method);
                return Ok(());
            }
        };

        self.validate_with_schema(schema_name, params)
    }

    /// Validate a value against a named schema
    pub fn validate_with_schema(&self, schema_name: &str, value: &Value) -> Result<()> {
        let schema = self
            .schemas
            .get(schema_name)
            .ok_or_else(|| anyhow!("Schema '{}' not found", schema_name))?;

        if let Err(errors) = schema.validate(value) {
            let error_messages: Vec<String> = errors
                .into_iter()
                .map(|e| format!("{}: {}", e.instance_path, e))
                .collect();

            return Err(anyhow!(
                "Schema validation failed for '{}': {}",
                schema_name,
                error_messages.join(", ")
            ));
        }

        Ok(())
    }

    /// Validate a raw JSON value as a JSON-RPC message.
    ///
    /// The discriminant is structural: a `method` with an `id` is a request,
    /// a `method` without one is a notification, and `result`/`error` mark
    /// the response variants.
    pub fn validate_raw_message(&self, value: &Value) -> McpResult<JsonRpcMessage> {
        let obj = value.as_object().ok_or_else(|| McpError::InvalidRequest {
            message: "message is not a JSON object".to_string(),
        })?;

        let parse = |message: serde_json::Error| McpError::InvalidRequest {
            message: message.to_string(),
        };

        if obj.contains_key("method") {
            if obj.contains_key("id") {
                self.validate_with_schema("jsonrpc_request", value)
                    .map_err(|e| McpError::InvalidRequest {
                        message: e.to_string(),
                    })?;
                let request: JsonRpcRequest =
                    serde_json::from_value(value.clone()).map_err(parse)?;
                return Ok(JsonRpcMessage::Request(request));
            }

            self.validate_with_schema("jsonrpc_notification", value)
                .map_err(|e| McpError::InvalidRequest {
                    message: e.to_string(),
                })?;
            let notification: JsonRpcNotification =
                serde_json::from_value(value.clone()).map_err(parse)?;
            return Ok(JsonRpcMessage::Notification(notification));
        }

        if obj.contains_key("result") {
            self.validate_with_schema("jsonrpc_response", value)
                .map_err(|e| McpError::InvalidRequest {
                    message: e.to_string(),
                })?;
            let response: JsonRpcResponse =
                serde_json::from_value(value.clone()).map_err(parse)?;
            return Ok(JsonRpcMessage::Response(response));
        }

        if obj.contains_key("error") {
            self.validate_with_schema("jsonrpc_error_response", value)
                .map_err(|e| McpError::InvalidRequest {
                    message: e.to_string(),
                })?;
            let response: JsonRpcErrorResponse =
                serde_json::from_value(value.clone()).map_err(parse)?;
            return Ok(JsonRpcMessage::ErrorResponse(response));
        }

        Err(McpError::InvalidRequest {
            message: "value does not match any known JSON-RPC message type".to_string(),
        })
    }

    /// Check if a protocol version is supported
    #[inline]
    pub fn is_protocol_version_supported(&self, version: &str) -> bool {
        SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
    }

    /// Get supported protocol versions
    #[inline]
    pub fn supported_protocol_versions(&self) -> Vec<&'static str> {
        SUPPORTED_PROTOCOL_VERSIONS.to_vec()
    }
}

/// Compile a JSON Schema under Draft 7
#[inline]
pub fn compile_schema(schema: &Value) -> Result<JSONSchema> {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map_err(|e| anyhow!("{}", e))
}

/// Validate tool arguments against the tool's compiled input schema.
///
/// Failures are reported with the instance path so clients can locate the
/// offending argument.
pub fn validate_tool_arguments(
    tool: &str,
    schema: &JSONSchema,
    arguments: &Value,
) -> McpResult<()> {
    if let Err(errors) = schema.validate(arguments) {
        let detail: Vec<String> = errors
            .into_iter()
            .map(|e| {
                if e.instance_path.to_string().is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", e.instance_path, e)
                }
            })
            .collect();
        return Err(McpError::InvalidToolArguments {
            tool: tool.to_string(),
            message: detail.join(", "),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_creation() {
        let validator = McpValidator::new().expect("validator is ok");
        assert!(!validator.schemas.is_empty());
    }

    #[test]
    fn protocol_version_validation() {
        let validator = McpValidator::new().expect("validator is ok");

        assert!(validator.is_protocol_version_supported(MCP_VERSION));
        assert!(!validator.is_protocol_version_supported("invalid-version"));
    }

    #[test]
    fn raw_request_parses_as_request() {
        let validator = McpValidator::new().expect("validator is ok");

        let value = json!({
            "jsonrpc": "2.0",
            "method": "ping",
            "id": "test-1"
        });

        let message = validator
            .validate_raw_message(&value)
            .expect("message is valid");
        if let JsonRpcMessage::Request(req) = message {
            assert_eq!(req.method, "ping");
            assert_eq!(req.id, RequestId::String("test-1".to_string()));
        } else {
            panic!("Expected request message");
        }
    }

    #[test]
    fn raw_notification_parses_as_notification() {
        let validator = McpValidator::new().expect("validator is ok");

        let value = json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });

        let message = validator
            .validate_raw_message(&value)
            .expect("message is valid");
        assert!(matches!(message, JsonRpcMessage::Notification(_)));
    }

    #[test]
    fn raw_response_parses_as_response() {
        let validator = McpValidator::new().expect("validator is ok");

        let value = json!({
            "jsonrpc": "2.0",
            "result": {"ok": true},
            "id": 7
        });

        let message = validator
            .validate_raw_message(&value)
            .expect("message is valid");
        assert!(matches!(message, JsonRpcMessage::Response(_)));
    }

    #[test]
    fn wrong_jsonrpc_version_is_rejected() {
        let validator = McpValidator::new().expect("validator is ok");

        let value = json!({
            "jsonrpc": "1.0",
            "method": "ping",
            "id": 1
        });

        assert!(validator.validate_raw_message(&value).is_err());
    }

    #[test]
    fn initialize_params_validation() {
        let validator = McpValidator::new().expect("validator is ok");

        let params = json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {
                "name": "test-client",
                "version": "1.0.0"
            }
        });

        assert!(
            validator
                .validate_with_schema("initialize_params", &params)
                .is_ok()
        );

        let invalid_params = json!({
            "protocolVersion": "2025-06-18"
        });

        assert!(
            validator
                .validate_with_schema("initialize_params", &invalid_params)
                .is_err()
        );
    }

    #[test]
    fn tool_argument_errors_carry_paths() {
        let schema = compile_schema(&json!({
            "type": "object",
            "properties": {
                "count": {"type": "integer"}
            },
            "required": ["count"]
        }))
        .expect("schema compiles");

        let err = validate_tool_arguments("demo", &schema, &json!({"count": "three"}))
            .expect_err("arguments are invalid");

        if let McpError::InvalidToolArguments { tool, message } = err {
            assert_eq!(tool, "demo");
            assert!(message.contains("/count"));
        } else {
            panic!("Expected InvalidToolArguments");
        }
    }
}
