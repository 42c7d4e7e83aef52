use ipmi_lan::commands::{
    ActivateSession, CloseSession, Command, GetChannelAuthCapabilities, GetDeviceId,
    GetSessionChallenge, SetSessionPrivilegeLevel,
};
use ipmi_lan::{AuthType, Error, PrivilegeLevel, RawResponse};

fn ok(data: Vec<u8>) -> RawResponse {
    RawResponse {
        completion_code: 0x00,
        data,
    }
}

#[test]
fn get_device_id_parses_response() {
    let response = ok(vec![
        0x20, 0x01, 0x02, 0x43, 0x51, 0x00, 0xA2, 0x02, 0x00, 0x00, 0x01, 0x00, 0x06, 0x2B, 0x2B,
    ]);

    let parsed = GetDeviceId.parse_response(response).expect("parse");
    assert_eq!(parsed.device_id, 0x20);
    assert_eq!(parsed.device_revision, 0x01);
    assert_eq!(parsed.firmware_major, 0x02);
    assert_eq!(parsed.firmware_minor, 0x43);
    assert_eq!(parsed.ipmi_version, 0x51);
    assert_eq!(parsed.manufacturer_id, 0x0000_02A2);
    assert_eq!(parsed.product_id, 0x0100);
}

#[test]
fn short_device_id_is_a_protocol_error() {
    let err = GetDeviceId
        .parse_response(ok(vec![0x20, 0x01]))
        .expect_err("expected error");
    assert!(matches!(err, Error::Protocol(_)));
}

#[test]
fn completion_code_is_reported() {
    let response = RawResponse {
        completion_code: 0xC1,
        data: vec![0xAA, 0xBB],
    };

    let err = GetDeviceId
        .parse_response(response)
        .expect_err("expected error");
    assert!(matches!(
        err,
        Error::CompletionCode {
            completion_code: 0xC1
        }
    ));
}

#[test]
fn channel_auth_capabilities_request_targets_current_channel() {
    let cmd = GetChannelAuthCapabilities::new(PrivilegeLevel::Administrator);
    assert_eq!(cmd.request_data(), vec![0x0E, 0x04]);

    let request = cmd.request();
    assert_eq!((request.netfn, request.cmd), (0x06, 0x38));

    let caps = cmd
        .parse_response(ok(vec![0x01, 0x15, 0x04, 0x01, 0, 0, 0, 0]))
        .expect("parse");
    assert!(caps.supports(AuthType::None));
    assert!(caps.supports(AuthType::Md5));
    assert!(caps.supports(AuthType::Password));
    assert!(!caps.supports(AuthType::Md2));
    assert!(caps.non_null_usernames);
}

#[test]
fn session_commands_encode_their_payloads() {
    let mut username = [0u8; 16];
    username[..4].copy_from_slice(b"root");
    let challenge = GetSessionChallenge {
        auth_type: AuthType::Password,
        username,
    };
    let data = challenge.request_data();
    assert_eq!(data[0], 0x04);
    assert_eq!(&data[1..5], b"root");

    let activate = ActivateSession {
        auth_type: AuthType::Md5,
        privilege: PrivilegeLevel::Operator,
        challenge: [0x11; 16],
        initial_outbound_seq: 1,
    };
    let data = activate.request_data();
    assert_eq!(&data[..2], &[0x02, 0x03]);
    assert_eq!(&data[18..], &[0x01, 0x00, 0x00, 0x00]);

    assert_eq!(
        SetSessionPrivilegeLevel {
            privilege: PrivilegeLevel::Administrator
        }
        .request_data(),
        vec![0x04]
    );
    assert_eq!(
        CloseSession { session_id: 1 }.request_data(),
        vec![0x01, 0x00, 0x00, 0x00]
    );
}

#[test]
fn activation_refusals_are_authentication_failures() {
    let activate = ActivateSession {
        auth_type: AuthType::None,
        privilege: PrivilegeLevel::User,
        challenge: [0; 16],
        initial_outbound_seq: 1,
    };
    for code in 0x81..=0x86 {
        let err = activate
            .parse_response(RawResponse {
                completion_code: code,
                data: Vec::new(),
            })
            .expect_err("expected refusal");
        assert!(matches!(err, Error::AuthenticationFailed(_)));
    }
}

#[test]
fn raised_privilege_is_reported() {
    let level = SetSessionPrivilegeLevel {
        privilege: PrivilegeLevel::Administrator,
    }
    .parse_response(ok(vec![0x04]))
    .expect("parse");
    assert_eq!(level, 0x04);
}
