use super::*;

#[test]
fn request_decodes_tagged_payload() {
    let json = r#"{"type":"proxy.start","data":{"name":"p1"}}"#;
    let req: Request = serde_json::from_str(json).unwrap();
    assert!(req.auth.is_none());
    assert_eq!(req.payload, Payload::Start(StartRequest { name: "p1".into() }));
}

#[test]
fn request_decodes_auth_block() {
    let json = r#"{"type":"proxy.list","auth":{"user":"alice","token":"T"}}"#;
    let req: Request = serde_json::from_str(json).unwrap();
    let auth = req.auth.unwrap();
    assert_eq!(auth.user, "alice");
    assert_eq!(auth.token, "T");
    assert_eq!(req.payload, Payload::List);
}

#[test]
fn unit_commands_need_no_data() {
    let req: Request = serde_json::from_str(r#"{"type":"system.ping"}"#).unwrap();
    assert_eq!(req.payload, Payload::Ping);
}

#[test]
fn round_trip_all_commands() {
    let payloads = vec![
        Payload::Start(StartRequest { name: "a".into() }),
        Payload::Stop(StopRequest { name: "a".into() }),
        Payload::Status(StatusRequest { name: "a".into() }),
        Payload::List,
        Payload::Info(InfoRequest { name: "a".into() }),
        Payload::SetActive(SetActiveRequest {
            name: "a".into(),
            host: "h".into(),
        }),
        Payload::Resolve(ResolveRequest { alias: "a".into() }),
        Payload::Ping,
    ];
    for payload in payloads {
        let req = Request::with_auth(
            payload,
            Some(Auth {
                user: "u".into(),
                token: "t".into(),
            }),
        );
        let encoded = serde_json::to_string(&req).unwrap();
        let decoded: Request = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, req, "round trip failed for {encoded}");
    }
}

#[test]
fn command_string_matches_wire_tag() {
    let req = Request::new(Payload::SetActive(SetActiveRequest {
        name: "p".into(),
        host: "h".into(),
    }));
    let value: serde_json::Value = serde_json::to_value(&req).unwrap();
    assert_eq!(value["type"], req.payload.command());
}

#[test]
fn unknown_command_is_rejected() {
    let json = r#"{"type":"proxy.reboot","data":{"name":"p1"}}"#;
    assert!(serde_json::from_str::<Request>(json).is_err());
}

#[test]
fn response_status_always_present() {
    let ok = serde_json::to_value(Response::ok()).unwrap();
    assert_eq!(ok["status"], "ok");
    assert!(ok.get("data").is_none());
    assert!(ok.get("error").is_none());

    let err = serde_json::to_value(Response::error("unknown proxy")).unwrap();
    assert_eq!(err["status"], "error");
    assert_eq!(err["error"], "unknown proxy");
}

#[test]
fn response_data_decodes_into_typed_payload() {
    let status = StatusResponse {
        name: "p1".into(),
        backend: "ssh".into(),
        running: true,
        pid: 4711,
        active_host: "h1".into(),
    };
    let resp = Response::ok_with_data(&status);
    assert!(resp.is_ok());
    let decoded: StatusResponse = resp.decode_data().unwrap();
    assert_eq!(decoded, status);
}

#[test]
fn info_response_wire_keys() {
    let info = InfoResponse {
        name: "p1".into(),
        backend: "ssh".into(),
        running: false,
        pid: 0,
        active_host: String::new(),
        host: "10.0.0.1".into(),
        port: 22,
        login: "ops".into(),
    };
    let value = serde_json::to_value(&info).unwrap();
    for key in [
        "name",
        "backend",
        "running",
        "pid",
        "active_host",
        "host",
        "port",
        "login",
    ] {
        assert!(value.get(key).is_some(), "missing key {key}");
    }
    assert_eq!(value["pid"], 0);
    assert_eq!(value["active_host"], "");
}
