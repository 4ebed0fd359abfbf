//! Tool dispatch — registry, input validation, approval gating.
//!
//! Failures never escape as exceptions: a missing tool, a schema
//! violation, a thrown execution error, and an `is_error` outcome all
//! surface as tool-scoped errors the model can read. Cancellation is the
//! one thing that propagates unwrapped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;

use cw_domain::error::Result;
use cw_domain::stream::StreamPart;
use cw_domain::tool::{ToolCall, ToolOutcome, ValidationIssue};
use cw_mcp_client::{split_scoped_name, McpRegistry};
use cw_providers::ToolSpec;
use cw_tools::safety;

use crate::cancel::CancelToken;
use crate::human::HumanChannel;
use crate::state::EventSink;
use crate::todos::TodoState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validator capability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validates tool input against a JSON-schema-shaped document, with
/// scalar coercion. The schema doubles as the provider-facing
/// serialization of the capability.
#[derive(Debug, Clone)]
pub struct InputValidator {
    schema: Value,
}

impl InputValidator {
    pub fn from_schema(schema: Value) -> Self {
        Self { schema }
    }

    /// Accepts any object (used for pass-through tools).
    pub fn permissive() -> Self {
        Self::from_schema(serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": true
        }))
    }

    pub fn json_schema(&self) -> &Value {
        &self.schema
    }

    /// Validate and coerce. Returns the (possibly coerced) value or the
    /// first issue found.
    pub fn validate(&self, input: &Value) -> std::result::Result<Value, ValidationIssue> {
        if self.schema.get("type").and_then(|t| t.as_str()) != Some("object") {
            return Ok(input.clone());
        }

        let Value::Object(fields) = input else {
            return Err(ValidationIssue {
                path: String::new(),
                message: format!("expected an object, got {}", type_name(input)),
            });
        };
        let mut coerced = fields.clone();

        if let Some(required) = self.schema.get("required").and_then(|r| r.as_array()) {
            for name in required.iter().filter_map(|v| v.as_str()) {
                if !fields.contains_key(name) {
                    return Err(ValidationIssue {
                        path: name.to_owned(),
                        message: format!("missing required field `{name}`"),
                    });
                }
            }
        }

        if let Some(properties) = self.schema.get("properties").and_then(|p| p.as_object()) {
            for (name, prop) in properties {
                let Some(value) = fields.get(name) else { continue };
                let Some(expected) = prop.get("type").and_then(|t| t.as_str()) else { continue };
                match coerce(value, expected) {
                    Some(v) => {
                        coerced.insert(name.clone(), v);
                    }
                    None => {
                        return Err(ValidationIssue {
                            path: name.clone(),
                            message: format!(
                                "expected {expected}, got {}",
                                type_name(value)
                            ),
                        });
                    }
                }
            }
        }

        Ok(Value::Object(coerced))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Coerce a value to the expected scalar type; `None` means mismatch.
fn coerce(value: &Value, expected: &str) -> Option<Value> {
    match (expected, value) {
        ("string", Value::String(_)) => Some(value.clone()),
        ("string", Value::Number(n)) => Some(Value::String(n.to_string())),
        ("boolean", Value::Bool(_)) => Some(value.clone()),
        ("boolean", Value::String(s)) => match s.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        ("integer" | "number", Value::Number(_)) => Some(value.clone()),
        ("integer", Value::String(s)) => {
            s.parse::<i64>().ok().map(|n| Value::Number(n.into()))
        }
        ("number", Value::String(s)) => s
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        ("array", Value::Array(_)) => Some(value.clone()),
        ("object", Value::Object(_)) => Some(value.clone()),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Descriptors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// When a tool call must be approved by the human.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    Never,
    Always,
    /// Gate only when the `command` input classifies as dangerous.
    ShellClassifier,
}

type ExecuteFn =
    Arc<dyn Fn(Value, ToolContext) -> BoxFuture<'static, Result<ToolOutcome>> + Send + Sync>;

/// A registered tool.
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub validator: InputValidator,
    pub approval: ApprovalPolicy,
    pub timeout: Option<Duration>,
    pub execute: ExecuteFn,
}

/// Everything a tool execution can reach.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub working_dir: PathBuf,
    pub human: Arc<HumanChannel>,
    pub todos: Arc<TodoState>,
    pub emit: EventSink,
    pub abort: CancelToken,
}

/// What a dispatch produced. `Denied` and `Aborted` are distinct from a
/// completed-with-error outcome because the caller surfaces them
/// differently on the stream.
#[derive(Debug)]
pub enum DispatchOutcome {
    Completed(ToolOutcome),
    Denied { reason: String },
    Aborted,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Registry of tool descriptors plus the MCP pass-through.
pub struct ToolDispatcher {
    tools: RwLock<HashMap<String, Arc<ToolDescriptor>>>,
    mcp: Option<Arc<McpRegistry>>,
}

impl ToolDispatcher {
    pub fn new(mcp: Option<Arc<McpRegistry>>) -> Self {
        Self { tools: RwLock::new(HashMap::new()), mcp }
    }

    pub fn register(&self, descriptor: ToolDescriptor) {
        self.tools.write().insert(descriptor.name.clone(), Arc::new(descriptor));
    }

    /// Tool specs for the provider: local descriptors plus, when MCP is
    /// enabled for the session, every discovered MCP tool.
    pub async fn tool_specs(&self, include_mcp: bool) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .read()
            .values()
            .map(|d| ToolSpec {
                name: d.name.clone(),
                description: d.description.clone(),
                input_schema: d.validator.json_schema().clone(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));

        if include_mcp {
            if let Some(mcp) = &self.mcp {
                for (scoped, tool) in mcp.tools().await {
                    specs.push(ToolSpec {
                        name: scoped,
                        description: (!tool.description.is_empty()).then(|| tool.description),
                        input_schema: tool.input_schema,
                    });
                }
            }
        }
        specs
    }

    /// Execute one tool call under the dispatch protocol. `on_part`
    /// receives stream parts produced mid-dispatch (approval requests).
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        on_part: &(dyn Fn(StreamPart) + Sync),
    ) -> DispatchOutcome {
        if let Some((server, tool)) = split_scoped_name(&call.name) {
            return self.execute_mcp(server, tool, call, ctx).await;
        }

        let Some(descriptor) = self.tools.read().get(&call.name).cloned() else {
            return DispatchOutcome::Completed(ToolOutcome::error(format!(
                "Tool {} not found",
                call.name
            )));
        };

        // Validation failure is a tool-scoped error, not an exception.
        let input = match descriptor.validator.validate(&call.input) {
            Ok(v) => v,
            Err(issue) => {
                return DispatchOutcome::Completed(ToolOutcome::error(issue.to_string()));
            }
        };

        // Approval gate.
        match self.consult_approval(&descriptor, call, &input, ctx, on_part).await {
            Gate::Proceed => {}
            Gate::Denied => return DispatchOutcome::Denied { reason: "denied".into() },
            Gate::Aborted => return DispatchOutcome::Aborted,
        }

        // Execute, racing the abort signal; a descriptor timeout maps to
        // a tool-scoped error.
        let fut = (descriptor.execute)(input, ctx.clone());
        let outcome = tokio::select! {
            biased;
            _ = ctx.abort.cancelled() => return DispatchOutcome::Aborted,
            result = async {
                match descriptor.timeout {
                    Some(limit) => match tokio::time::timeout(limit, fut).await {
                        Ok(r) => r,
                        Err(_) => Ok(ToolOutcome::error(format!(
                            "{} timed out after {}s", descriptor.name, limit.as_secs()
                        ))),
                    },
                    None => fut.await,
                }
            } => result,
        };

        match outcome {
            Ok(outcome) => DispatchOutcome::Completed(outcome),
            Err(cw_domain::error::Error::TurnAborted) => DispatchOutcome::Aborted,
            Err(e) => DispatchOutcome::Completed(ToolOutcome::error(e.to_string())),
        }
    }

    async fn execute_mcp(
        &self,
        server: &str,
        tool: &str,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> DispatchOutcome {
        let Some(mcp) = &self.mcp else {
            return DispatchOutcome::Completed(ToolOutcome::error(format!(
                "Tool {} not found",
                call.name
            )));
        };

        // MCP-transport cancellation is best-effort: the call is raced
        // against the abort signal, the server side runs to completion.
        tokio::select! {
            biased;
            _ = ctx.abort.cancelled() => DispatchOutcome::Aborted,
            result = mcp.call(server, tool, call.input.clone()) => match result {
                Ok(call_result) => DispatchOutcome::Completed(call_result.into_outcome()),
                Err(e) => DispatchOutcome::Completed(ToolOutcome::error(e.to_string())),
            },
        }
    }

    async fn consult_approval(
        &self,
        descriptor: &ToolDescriptor,
        call: &ToolCall,
        input: &Value,
        ctx: &ToolContext,
        on_part: &(dyn Fn(StreamPart) + Sync),
    ) -> Gate {
        let (command, dangerous, reason_code) = match descriptor.approval {
            ApprovalPolicy::Never => return Gate::Proceed,
            ApprovalPolicy::Always => {
                (format!("{} {}", descriptor.name, input), false, None)
            }
            ApprovalPolicy::ShellClassifier => {
                let command = input
                    .get("command")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_owned();
                match safety::classify_command(&command, &ctx.working_dir) {
                    Some(reason) => (command, true, Some(reason.code().to_owned())),
                    None => return Gate::Proceed,
                }
            }
        };

        if ctx.human.is_yolo() {
            return Gate::Proceed;
        }

        let approval_id = uuid::Uuid::new_v4().to_string();
        on_part(StreamPart::ToolApprovalRequest {
            approval_id: approval_id.clone(),
            call: call.clone(),
        });

        match ctx.human.approve_as(&approval_id, &command, dangerous, reason_code).await {
            Ok(true) => Gate::Proceed,
            Ok(false) => Gate::Denied,
            Err(_) => Gate::Aborted,
        }
    }
}

enum Gate {
    Proceed,
    Denied,
    Aborted,
}
