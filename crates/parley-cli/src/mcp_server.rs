use std::{
    future::Future,
    io::{BufRead, Write},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use parley_escalation::{EscalationError, EscalationService, PollResponse, RaiseRequest};
use serde_json::{json, Value};

const MCP_JSONRPC_VERSION: &str = "2.0";
const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_ERROR_PARSE: i64 = -32700;
const MCP_ERROR_INVALID_REQUEST: i64 = -32600;
const MCP_ERROR_METHOD_NOT_FOUND: i64 = -32601;
const MCP_ERROR_INVALID_PARAMS: i64 = -32602;
const MCP_CONTENT_TYPE_TEXT: &str = "text";
const MCP_TOOL_ESCALATION_RAISE: &str = "escalation_raise";
const MCP_TOOL_ESCALATION_POLL: &str = "escalation_poll";
const MCP_TOOL_ESCALATION_WAIT: &str = "escalation_wait";
const DEFAULT_WAIT_SECONDS: u64 = 60;
const MAX_WAIT_SECONDS: u64 = 600;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct McpServeReport {
    pub(crate) processed_frames: usize,
    pub(crate) error_count: usize,
}

#[derive(Clone)]
pub(crate) struct McpServerState {
    pub(crate) service: Arc<EscalationService>,
    pub(crate) wait_poll_interval: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum McpFraming {
    #[default]
    ContentLength,
    LineDelimited,
}

#[derive(Debug, Clone)]
enum McpInboundFrame {
    Message(Value),
    Malformed(String),
}

#[derive(Debug, Clone)]
struct McpJsonRpcRequest {
    /// `None` marks a notification, which never receives a response.
    id: Option<Value>,
    method: String,
    params: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone)]
struct McpToolDescriptor {
    name: &'static str,
    description: &'static str,
    input_schema: Value,
}

#[derive(Debug, Clone)]
struct McpDispatchError {
    id: Value,
    code: i64,
    message: String,
}

impl McpDispatchError {
    fn new(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            code,
            message: message.into(),
        }
    }
}

/// Serves JSON-RPC requests from `reader` until EOF, answering each request in
/// the framing it arrived in.
pub(crate) fn serve_mcp_jsonrpc_reader<R, W>(
    reader: &mut R,
    writer: &mut W,
    state: &McpServerState,
) -> Result<McpServeReport>
where
    R: BufRead,
    W: Write,
{
    let mut processed_frames = 0usize;
    let mut error_count = 0usize;
    let mut framing = McpFraming::default();

    loop {
        let frame = match read_jsonrpc_frame(reader) {
            Ok(Some((frame_framing, frame))) => {
                framing = frame_framing;
                frame
            }
            Ok(None) => break,
            Err(error) => {
                let response = jsonrpc_error_frame(
                    Value::Null,
                    MCP_ERROR_PARSE,
                    format!("failed to read mcp frame: {error:#}"),
                );
                write_jsonrpc_frame(writer, framing, &response)?;
                error_count = error_count.saturating_add(1);
                break;
            }
        };
        processed_frames = processed_frames.saturating_add(1);

        let value = match frame {
            McpInboundFrame::Message(value) => value,
            McpInboundFrame::Malformed(message) => {
                error_count = error_count.saturating_add(1);
                let response = jsonrpc_error_frame(Value::Null, MCP_ERROR_PARSE, message);
                write_jsonrpc_frame(writer, framing, &response)?;
                continue;
            }
        };

        let response = match parse_jsonrpc_request(&value) {
            Ok(request) => {
                let outcome = dispatch_jsonrpc_request(&request, state);
                let Some(id) = request.id else {
                    if let Err(error) = outcome {
                        tracing::debug!(
                            method = %request.method,
                            error = %error.message,
                            "mcp notification failed"
                        );
                    }
                    continue;
                };
                match outcome {
                    Ok(result) => jsonrpc_result_frame(id, result),
                    Err(error) => {
                        error_count = error_count.saturating_add(1);
                        jsonrpc_error_frame(error.id, error.code, error.message)
                    }
                }
            }
            Err(error) => {
                error_count = error_count.saturating_add(1);
                jsonrpc_error_frame(error.id, error.code, error.message)
            }
        };
        write_jsonrpc_frame(writer, framing, &response)?;
    }

    Ok(McpServeReport {
        processed_frames,
        error_count,
    })
}

fn parse_jsonrpc_request(value: &Value) -> Result<McpJsonRpcRequest, McpDispatchError> {
    let Some(object) = value.as_object() else {
        return Err(McpDispatchError::new(
            Value::Null,
            MCP_ERROR_INVALID_REQUEST,
            "jsonrpc request must be an object",
        ));
    };
    let id = object.get("id").cloned();
    let error_id = id.clone().unwrap_or(Value::Null);
    let jsonrpc = object
        .get("jsonrpc")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if jsonrpc != MCP_JSONRPC_VERSION {
        return Err(McpDispatchError::new(
            error_id,
            MCP_ERROR_INVALID_REQUEST,
            format!("jsonrpc must be '{}'", MCP_JSONRPC_VERSION),
        ));
    }
    let method = object
        .get("method")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            McpDispatchError::new(
                error_id.clone(),
                MCP_ERROR_INVALID_REQUEST,
                "jsonrpc request must include non-empty method",
            )
        })?;
    let params = match object.get("params") {
        Some(Value::Object(params)) => params.clone(),
        Some(Value::Null) | None => serde_json::Map::new(),
        Some(_) => {
            return Err(McpDispatchError::new(
                error_id,
                MCP_ERROR_INVALID_PARAMS,
                "jsonrpc request params must be an object",
            ))
        }
    };
    Ok(McpJsonRpcRequest {
        id,
        method: method.to_string(),
        params,
    })
}

fn dispatch_jsonrpc_request(
    request: &McpJsonRpcRequest,
    state: &McpServerState,
) -> Result<Value, McpDispatchError> {
    let id = request.id.clone().unwrap_or(Value::Null);
    match request.method.as_str() {
        "initialize" => Ok(handle_initialize()),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(handle_tools_list()),
        "tools/call" => handle_tools_call(state, &request.params).map_err(|error| {
            McpDispatchError::new(id, MCP_ERROR_INVALID_PARAMS, format!("{error:#}"))
        }),
        method if method.starts_with("notifications/") => Ok(Value::Null),
        other => Err(McpDispatchError::new(
            id,
            MCP_ERROR_METHOD_NOT_FOUND,
            format!("unsupported method '{}'", other),
        )),
    }
}

fn handle_initialize() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "serverInfo": {
            "name": "parley",
            "version": env!("CARGO_PKG_VERSION")
        },
        "capabilities": {
            "tools": {
                "listChanged": false
            }
        }
    })
}

fn handle_tools_list() -> Value {
    json!({
        "tools": escalation_mcp_tools()
            .into_iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema
                })
            })
            .collect::<Vec<_>>()
    })
}

fn escalation_mcp_tools() -> Vec<McpToolDescriptor> {
    vec![
        McpToolDescriptor {
            name: MCP_TOOL_ESCALATION_POLL,
            description: "Check the status of a previously raised escalation. Unknown ids report status 'unknown'.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string", "description": "Escalation id returned by escalation_raise"}
                },
                "required": ["id"],
                "additionalProperties": false
            }),
        },
        McpToolDescriptor {
            name: MCP_TOOL_ESCALATION_RAISE,
            description: "Ask a human a question over the configured chat channel. Returns an id immediately; poll it for the answer.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "question": {"type": "string", "description": "Question for the human"},
                    "context": {"type": "string", "description": "Optional supporting detail"},
                    "timeout_seconds": {"type": "integer", "minimum": 1, "description": "Seconds before the escalation expires"}
                },
                "required": ["question"],
                "additionalProperties": false
            }),
        },
        McpToolDescriptor {
            name: MCP_TOOL_ESCALATION_WAIT,
            description: "Wait up to wait_seconds for an escalation to be answered or expire, then report its status.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string", "description": "Escalation id returned by escalation_raise"},
                    "wait_seconds": {"type": "integer", "minimum": 0, "maximum": MAX_WAIT_SECONDS, "description": "Maximum seconds to wait (default 60)"}
                },
                "required": ["id"],
                "additionalProperties": false
            }),
        },
    ]
}

fn handle_tools_call(
    state: &McpServerState,
    params: &serde_json::Map<String, Value>,
) -> Result<Value> {
    let tool_name = params
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("tools/call requires non-empty field 'name'"))?;
    let arguments = match params.get("arguments") {
        Some(Value::Object(arguments)) => Value::Object(arguments.clone()),
        Some(_) => bail!("tools/call field 'arguments' must be an object when provided"),
        None => Value::Object(serde_json::Map::new()),
    };

    match tool_name {
        MCP_TOOL_ESCALATION_RAISE => execute_raise_tool(state, arguments),
        MCP_TOOL_ESCALATION_POLL => Ok(execute_poll_tool(state, &arguments)),
        MCP_TOOL_ESCALATION_WAIT => execute_wait_tool(state, &arguments),
        other => bail!("unknown mcp tool '{}'", other),
    }
}

fn execute_raise_tool(state: &McpServerState, arguments: Value) -> Result<Value> {
    let request = match serde_json::from_value::<RaiseRequest>(arguments) {
        Ok(request) => request,
        Err(error) => {
            return Ok(mcp_tool_error(format!(
                "invalid {MCP_TOOL_ESCALATION_RAISE} arguments: {error}"
            )))
        }
    };
    let service = Arc::clone(&state.service);
    let outcome = block_on_tool_future(async move { service.raise(request).await })?;
    let content = match outcome {
        Ok(receipt) => {
            let mut content = json!({
                "id": receipt.id,
                "expires_unix_ms": receipt.expires_unix_ms,
                "delivered": true,
            });
            if let Some(message_id) = receipt.delivery_message_id {
                content["delivery_message_id"] = Value::String(message_id);
            }
            content
        }
        Err(EscalationError::DeliveryFailure { id, reason }) => {
            let expires_unix_ms = state.service.poll(&id).expires_unix_ms;
            json!({
                "id": id,
                "expires_unix_ms": expires_unix_ms,
                "delivered": false,
                "error": reason,
            })
        }
        Err(error @ EscalationError::InvalidRequest(_)) => {
            return Ok(mcp_tool_error(error.to_string()))
        }
    };
    Ok(mcp_tool_call_result(content, false))
}

fn execute_poll_tool(state: &McpServerState, arguments: &Value) -> Value {
    let id = match required_string_argument(arguments, "id") {
        Ok(id) => id,
        Err(error) => return mcp_tool_error(error.to_string()),
    };
    poll_response_result(&state.service.poll(id))
}

fn execute_wait_tool(state: &McpServerState, arguments: &Value) -> Result<Value> {
    let id = match required_string_argument(arguments, "id") {
        Ok(id) => id.to_string(),
        Err(error) => return Ok(mcp_tool_error(error.to_string())),
    };
    let wait_seconds = match arguments.get("wait_seconds") {
        None | Some(Value::Null) => DEFAULT_WAIT_SECONDS,
        Some(value) => match value.as_u64() {
            Some(seconds) => seconds.min(MAX_WAIT_SECONDS),
            None => {
                return Ok(mcp_tool_error(
                    "wait_seconds must be a non-negative integer".to_string(),
                ))
            }
        },
    };
    let service = Arc::clone(&state.service);
    let poll_interval = state.wait_poll_interval;
    let response = block_on_tool_future(async move {
        service
            .wait_for_answer(&id, Duration::from_secs(wait_seconds), poll_interval)
            .await
    })?;
    Ok(poll_response_result(&response))
}

fn poll_response_result(response: &PollResponse) -> Value {
    match serde_json::to_value(response) {
        Ok(content) => mcp_tool_call_result(content, false),
        Err(error) => mcp_tool_error(format!("failed to serialize poll response: {error}")),
    }
}

fn required_string_argument<'a>(arguments: &'a Value, field: &str) -> Result<&'a str> {
    arguments
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("field '{field}' must be a non-empty string"))
}

fn block_on_tool_future<F>(future: F) -> Result<F::Output>
where
    F: Future,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Ok(tokio::task::block_in_place(|| handle.block_on(future))),
        Err(_) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to create temporary tokio runtime for mcp tool execution")?;
            Ok(runtime.block_on(future))
        }
    }
}

fn mcp_tool_error(message: String) -> Value {
    mcp_tool_call_result(json!({ "error": message }), true)
}

fn mcp_tool_call_result(content: Value, is_error: bool) -> Value {
    let text = serde_json::to_string_pretty(&content)
        .unwrap_or_else(|_| "{\"error\":\"failed to serialize tool result\"}".to_string());
    json!({
        "content": [{
            "type": MCP_CONTENT_TYPE_TEXT,
            "text": text
        }],
        "isError": is_error,
        "structuredContent": content,
    })
}

fn read_jsonrpc_frame<R>(reader: &mut R) -> Result<Option<(McpFraming, McpInboundFrame)>>
where
    R: BufRead,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader
            .read_line(&mut line)
            .context("failed to read mcp frame line")?;
        if bytes == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            break;
        }
    }

    let trimmed = line.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        let frame = match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => McpInboundFrame::Message(value),
            Err(error) => {
                McpInboundFrame::Malformed(format!("failed to parse mcp JSON line: {error}"))
            }
        };
        return Ok(Some((McpFraming::LineDelimited, frame)));
    }

    let mut content_length = parse_content_length_header(&line)?;
    loop {
        line.clear();
        let bytes = reader
            .read_line(&mut line)
            .context("failed to read mcp frame header line")?;
        if bytes == 0 {
            bail!("unexpected eof while reading mcp frame headers");
        }
        if line == "\n" || line == "\r\n" {
            break;
        }
        if let Some(parsed) = parse_content_length_header(&line)? {
            content_length = Some(parsed);
        }
    }

    let content_length =
        content_length.ok_or_else(|| anyhow!("mcp frame is missing Content-Length header"))?;
    let mut body = vec![0_u8; content_length];
    reader
        .read_exact(&mut body)
        .context("failed to read mcp frame body bytes")?;
    let frame = match serde_json::from_slice::<Value>(&body) {
        Ok(value) => McpInboundFrame::Message(value),
        Err(error) => {
            McpInboundFrame::Malformed(format!("failed to parse mcp JSON frame: {error}"))
        }
    };
    Ok(Some((McpFraming::ContentLength, frame)))
}

fn parse_content_length_header(line: &str) -> Result<Option<usize>> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let (name, value) = trimmed.split_once(':').ok_or_else(|| {
        anyhow!(
            "invalid mcp header '{}': expected 'Name: value' format",
            trimmed
        )
    })?;
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return Ok(None);
    }
    let parsed = value
        .trim()
        .parse::<usize>()
        .context("invalid Content-Length header value")?;
    Ok(Some(parsed))
}

fn write_jsonrpc_frame<W>(writer: &mut W, framing: McpFraming, value: &Value) -> Result<()>
where
    W: Write,
{
    let encoded = serde_json::to_vec(value).context("failed to encode mcp jsonrpc response")?;
    match framing {
        McpFraming::ContentLength => {
            write!(writer, "Content-Length: {}\r\n\r\n", encoded.len())
                .context("failed to write mcp frame header")?;
            writer
                .write_all(&encoded)
                .context("failed to write mcp frame body")?;
        }
        McpFraming::LineDelimited => {
            writer
                .write_all(&encoded)
                .context("failed to write mcp frame body")?;
            writer
                .write_all(b"\n")
                .context("failed to write mcp frame delimiter")?;
        }
    }
    writer.flush().context("failed to flush mcp frame output")?;
    Ok(())
}

fn jsonrpc_result_frame(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": MCP_JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

fn jsonrpc_error_frame(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": MCP_JSONRPC_VERSION,
        "id": id,
        "error": {
            "code": code,
            "message": message.into(),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::{
        io::{BufRead, Read},
        sync::Arc,
        time::Duration,
    };

    use parley_channel::MemoryChannel;
    use parley_escalation::{EscalationRegistry, EscalationService, RegistryConfig};
    use serde_json::{json, Value};

    use super::{
        serve_mcp_jsonrpc_reader, McpServerState, MCP_ERROR_INVALID_PARAMS,
        MCP_ERROR_METHOD_NOT_FOUND, MCP_ERROR_PARSE, MCP_PROTOCOL_VERSION,
    };

    struct Fixture {
        registry: Arc<EscalationRegistry>,
        channel: Arc<MemoryChannel>,
        state: McpServerState,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(EscalationRegistry::new(RegistryConfig::default()));
        let channel = Arc::new(MemoryChannel::new());
        let service = EscalationService::new(Arc::clone(&registry), channel.clone());
        Fixture {
            registry,
            channel,
            state: McpServerState {
                service: Arc::new(service),
                wait_poll_interval: Duration::from_millis(5),
            },
        }
    }

    fn encode_frames(frames: &[Value]) -> Vec<u8> {
        let mut encoded = Vec::new();
        for frame in frames {
            let payload = serde_json::to_vec(frame).expect("encode frame");
            encoded
                .extend_from_slice(format!("Content-Length: {}\r\n\r\n", payload.len()).as_bytes());
            encoded.extend_from_slice(&payload);
        }
        encoded
    }

    fn decode_frames(raw: &[u8]) -> Vec<Value> {
        let mut frames = Vec::new();
        let mut cursor = std::io::Cursor::new(raw);
        let mut reader = std::io::BufReader::new(&mut cursor);
        loop {
            let mut header = String::new();
            let bytes = reader.read_line(&mut header).expect("header");
            if bytes == 0 {
                break;
            }
            if header.trim().is_empty() {
                continue;
            }
            let length = header
                .split_once(':')
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .expect("content length");
            let mut separator = String::new();
            reader.read_line(&mut separator).expect("separator");
            let mut body = vec![0_u8; length];
            reader.read_exact(&mut body).expect("body");
            frames.push(serde_json::from_slice::<Value>(&body).expect("json frame"));
        }
        frames
    }

    fn serve_framed(state: &McpServerState, frames: &[Value]) -> Vec<Value> {
        let input = encode_frames(frames);
        let mut reader = std::io::BufReader::new(std::io::Cursor::new(input));
        let mut output = Vec::new();
        serve_mcp_jsonrpc_reader(&mut reader, &mut output, state).expect("serve");
        decode_frames(&output)
    }

    fn call_tool(state: &McpServerState, name: &str, arguments: Value) -> Value {
        let responses = serve_framed(
            state,
            &[json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": {"name": name, "arguments": arguments}
            })],
        );
        responses[0]["result"].clone()
    }

    #[test]
    fn functional_initialize_and_tools_list_describe_escalation_tools() {
        let fixture = fixture();
        let responses = serve_framed(
            &fixture.state,
            &[
                json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
                json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
                json!({"jsonrpc": "2.0", "id": 3, "method": "ping"}),
            ],
        );
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["result"]["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(responses[0]["result"]["serverInfo"]["name"], "parley");
        let names = responses[1]["result"]["tools"]
            .as_array()
            .expect("tools")
            .iter()
            .map(|tool| tool["name"].as_str().expect("name").to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["escalation_poll", "escalation_raise", "escalation_wait"]
        );
        assert_eq!(responses[2]["id"], 3);
        assert_eq!(responses[2]["result"], json!({}));
    }

    #[test]
    fn functional_line_delimited_requests_get_line_delimited_responses() {
        let fixture = fixture();
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":\"a\",\"method\":\"ping\"}\n",
            "\n",
            "{not json}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":\"b\",\"method\":\"tools/list\"}\n"
        );
        let mut reader = std::io::BufReader::new(input.as_bytes());
        let mut output = Vec::new();
        let report =
            serve_mcp_jsonrpc_reader(&mut reader, &mut output, &fixture.state).expect("serve");
        assert_eq!(report.processed_frames, 3);
        assert_eq!(report.error_count, 1);

        let lines = String::from_utf8(output).expect("utf8");
        let responses = lines
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).expect("json line"))
            .collect::<Vec<_>>();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["id"], "a");
        assert_eq!(responses[1]["error"]["code"], MCP_ERROR_PARSE);
        assert_eq!(responses[2]["id"], "b");
    }

    #[test]
    fn functional_raise_then_poll_round_trip() {
        let fixture = fixture();
        let raised = call_tool(
            &fixture.state,
            "escalation_raise",
            json!({"question": "Proceed with deploy?", "timeout_seconds": 5}),
        );
        assert_eq!(raised["isError"], false);
        assert_eq!(raised["structuredContent"]["delivered"], true);
        let id = raised["structuredContent"]["id"]
            .as_str()
            .expect("id")
            .to_string();
        assert!(fixture.channel.sent_messages()[0].contains(&format!("#{id}")));

        let pending = call_tool(&fixture.state, "escalation_poll", json!({"id": id}));
        assert_eq!(pending["structuredContent"]["status"], "pending");

        assert!(fixture.registry.match_reply(&id, "yes", "42").is_answered());
        let answered = call_tool(&fixture.state, "escalation_poll", json!({"id": id}));
        assert_eq!(answered["structuredContent"]["status"], "answered");
        assert_eq!(answered["structuredContent"]["answer"], "yes");
        assert!(answered["content"][0]["text"]
            .as_str()
            .expect("text")
            .contains("\"answered\""));
    }

    #[test]
    fn functional_raise_reports_undelivered_question_without_tool_error() {
        let fixture = fixture();
        fixture.channel.set_send_failure(true);
        let raised = call_tool(
            &fixture.state,
            "escalation_raise",
            json!({"question": "Rotate keys?"}),
        );
        assert_eq!(raised["isError"], false);
        assert_eq!(raised["structuredContent"]["delivered"], false);
        assert!(raised["structuredContent"]["expires_unix_ms"].as_u64().is_some());
        assert!(raised["structuredContent"]["error"]
            .as_str()
            .expect("error")
            .contains("acknowledgement lost"));
    }

    #[test]
    fn functional_invalid_tool_arguments_are_tool_errors() {
        let fixture = fixture();
        let blank = call_tool(&fixture.state, "escalation_raise", json!({"question": " "}));
        assert_eq!(blank["isError"], true);
        let wrong_type = call_tool(&fixture.state, "escalation_raise", json!({"question": 5}));
        assert_eq!(wrong_type["isError"], true);
        let unknown_field = call_tool(
            &fixture.state,
            "escalation_raise",
            json!({"question": "Deploy?", "priority": "high"}),
        );
        assert_eq!(unknown_field["isError"], true);
        let missing_id = call_tool(&fixture.state, "escalation_poll", json!({}));
        assert_eq!(missing_id["isError"], true);
        assert!(fixture.registry.is_empty());
    }

    #[test]
    fn functional_poll_unknown_id_reports_unknown_status() {
        let fixture = fixture();
        let result = call_tool(&fixture.state, "escalation_poll", json!({"id": "nope"}));
        assert_eq!(result["isError"], false);
        assert_eq!(result["structuredContent"], json!({"id": "nope", "status": "unknown"}));
    }

    #[test]
    fn functional_wait_returns_resolved_escalation_and_times_out_pending() {
        let fixture = fixture();
        let answered = fixture
            .registry
            .create("q", None, Some(Duration::from_secs(60)));
        fixture.registry.match_reply(&answered, "ok", "42");
        let result = call_tool(
            &fixture.state,
            "escalation_wait",
            json!({"id": answered, "wait_seconds": 30}),
        );
        assert_eq!(result["structuredContent"]["status"], "answered");

        let pending = fixture
            .registry
            .create("q", None, Some(Duration::from_secs(60)));
        let result = call_tool(
            &fixture.state,
            "escalation_wait",
            json!({"id": pending, "wait_seconds": 0}),
        );
        assert_eq!(result["structuredContent"]["status"], "pending");
    }

    #[test]
    fn regression_unknown_method_and_tool_map_to_jsonrpc_errors() {
        let fixture = fixture();
        let responses = serve_framed(
            &fixture.state,
            &[
                json!({"jsonrpc": "2.0", "id": 1, "method": "resources/list"}),
                json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": "bash"}}),
                json!({"jsonrpc": "1.0", "id": 3, "method": "ping"}),
            ],
        );
        assert_eq!(responses[0]["error"]["code"], MCP_ERROR_METHOD_NOT_FOUND);
        assert_eq!(responses[1]["error"]["code"], MCP_ERROR_INVALID_PARAMS);
        assert!(responses[1]["error"]["message"]
            .as_str()
            .expect("message")
            .contains("unknown mcp tool"));
        assert_eq!(responses[2]["error"]["code"], -32600);
        assert_eq!(responses[2]["id"], 3);
    }

    #[test]
    fn regression_truncated_content_length_frame_stops_with_parse_error() {
        let fixture = fixture();
        let input = b"Content-Length: 100\r\n\r\n{\"jsonrpc\"".to_vec();
        let mut reader = std::io::BufReader::new(std::io::Cursor::new(input));
        let mut output = Vec::new();
        let report =
            serve_mcp_jsonrpc_reader(&mut reader, &mut output, &fixture.state).expect("serve");
        assert_eq!(report.error_count, 1);
        let responses = decode_frames(&output);
        assert_eq!(responses[0]["error"]["code"], MCP_ERROR_PARSE);
    }
}
