//! Stratum wire-format compatibility tests
//!
//! These tests verify that the JSON going over the wire matches what
//! grin miners and the grin node stratum server actually exchange.

use grin_pool_stratum::protocol::{
    ERR_LOW_DIFFICULTY, ERR_METHOD_NOT_FOUND, ERR_STALE_SOLUTION, JobTemplate, LoginParams,
    RpcError, RpcRequest, RpcResponse, StratumMessage, SubmitParams,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

#[test]
fn test_login_request_format() {
    // The login a grin-miner sends on connect
    let params = LoginParams {
        login: "alice.rig1".to_string(),
        pass: "x".to_string(),
        agent: "grin-miner/2.0".to_string(),
    };
    let request = RpcRequest::new("1", "login", Some(serde_json::to_value(&params).unwrap()));

    let wire = serde_json::to_string(&request).unwrap();
    let expected = r#"{"id":"1","jsonrpc":"2.0","method":"login","params":{"login":"alice.rig1","pass":"x","agent":"grin-miner/2.0"}}"#;

    // Parse both to compare structure (key order might differ)
    let wire_parsed: Value = serde_json::from_str(&wire).unwrap();
    let expected_parsed: Value = serde_json::from_str(expected).unwrap();
    assert_eq!(wire_parsed, expected_parsed);
}

#[test]
fn test_job_notification_format() {
    // Jobs are pushed as requests with id "Stratum"
    let job = JobTemplate {
        height: 123456,
        job_id: 12,
        difficulty: 8,
        pre_pow: "0001000...".to_string(),
    };
    let request = RpcRequest::new("Stratum", "job", Some(serde_json::to_value(&job).unwrap()));

    let wire = serde_json::to_string(&request).unwrap();
    assert!(wire.contains(r#""id":"Stratum""#));
    assert!(wire.contains(r#""method":"job""#));
    assert!(wire.contains(r#""height":123456"#));
    assert!(wire.contains(r#""difficulty":8"#));
}

#[test]
fn test_node_job_parses_as_request() {
    // A job line as the grin node emits it
    let line = r#"{"id":"Stratum","jsonrpc":"2.0","method":"job","params":{"difficulty":1,"height":16375,"job_id":5,"pre_pow":"00010000000000003c4d"}}"#;

    let msg = StratumMessage::from_json(line).unwrap();
    let req = match msg {
        StratumMessage::Request(req) => req,
        StratumMessage::Response(_) => panic!("job must parse as a request"),
    };
    assert_eq!(req.method, "job");

    let job: JobTemplate = serde_json::from_value(req.params.unwrap()).unwrap();
    assert_eq!(job.height, 16375);
    assert_eq!(job.job_id, 5);
    assert_eq!(job.difficulty, 1);
}

#[test]
fn test_submit_params_format() {
    let params = SubmitParams {
        height: 16375,
        job_id: 5,
        edge_bits: 31,
        nonce: 8895699060858340826,
        pow: vec![4210040, 10141596, 13269632],
    };

    let wire = serde_json::to_value(&params).unwrap();
    assert_eq!(wire["height"], json!(16375));
    assert_eq!(wire["edge_bits"], json!(31));
    assert_eq!(wire["nonce"], json!(8895699060858340826u64));
    assert_eq!(wire["pow"], json!([4210040, 10141596, 13269632]));

    assert_eq!(params.as_string(), "16375+5+8895699060858340826+31");
}

#[test]
fn test_error_response_formats() {
    let low_diff = RpcResponse::error(
        "4",
        "submit",
        RpcError::new(ERR_LOW_DIFFICULTY, "Share rejected due to low difficulty"),
    );
    let wire = serde_json::to_string(&low_diff).unwrap();
    assert!(wire.contains(r#""id":"4""#));
    assert!(wire.contains("-32501"));
    assert!(wire.contains("low difficulty"));
    assert!(!wire.contains(r#""result""#));

    let stale = RpcResponse::error(
        "5",
        "submit",
        RpcError::new(ERR_STALE_SOLUTION, "Solution submitted too late"),
    );
    assert_eq!(stale.rpc_error().unwrap().code, -32503);

    let unknown = RpcResponse::error(
        "6",
        "mining.subscribe",
        RpcError::new(ERR_METHOD_NOT_FOUND, "Method not found"),
    );
    assert_eq!(unknown.rpc_error().unwrap().code, -32601);
}

#[test]
fn test_node_submit_responses_parse() {
    // Accepted share
    let ok = r#"{"id":"NDIrMTYzNzUrNSs3NzcrMzE=","jsonrpc":"2.0","method":"submit","result":"ok","error":null}"#;
    let msg = StratumMessage::from_json(ok).unwrap();
    match msg {
        StratumMessage::Response(resp) => {
            assert_eq!(resp.method, "submit");
            assert_eq!(resp.result.unwrap(), json!("ok"));
        }
        _ => panic!("expected a response"),
    }

    // Rejected share, error carries the classification
    let stale = r#"{"id":"NDIrMTYzNzUrNSs3NzcrMzE=","jsonrpc":"2.0","method":"submit","result":null,"error":{"code":-32503,"message":"Solution submitted too late"}}"#;
    let msg = StratumMessage::from_json(stale).unwrap();
    match msg {
        StratumMessage::Response(resp) => {
            assert_eq!(resp.rpc_error().unwrap().code, ERR_STALE_SOLUTION);
        }
        _ => panic!("expected a response"),
    }
}

#[test]
fn test_keepalive_roundtrip() {
    let request = RpcRequest::new("Pool-1", "keepalive", None);
    let wire = serde_json::to_string(&request).unwrap();
    assert!(!wire.contains("params"));

    let response = r#"{"id":"Pool-1","jsonrpc":"2.0","method":"keepalive","result":"ok","error":null}"#;
    let msg = StratumMessage::from_json(response).unwrap();
    assert!(matches!(msg, StratumMessage::Response(_)));
}
