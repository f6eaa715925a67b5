#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let s = String::from_utf8_lossy(data);

    if let Ok(raw) = serde_json::from_str::<serde_json::Value>(&s) {
        match readwise_mcp::validate_envelope(raw) {
            Ok(req) => {
                let _ = readwise_mcp::McpRequest::parse(&req.method, req.params);
            }
            Err(resp) => assert!(resp.error().is_some()),
        }
    }
    let _ = serde_json::from_str::<readwise_mcp::JsonRpcResponse>(&s);
    let _ = serde_json::from_str::<readwise_mcp::CallToolParams>(&s);
});
