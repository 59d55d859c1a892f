mod test_support;

use serde_json::json;
use test_support::{error_code, open_as_admin, request_err, request_ok, spawn_sidecar};

#[test]
fn setup_defaults_update_and_validation() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_as_admin(&mut stdin, &mut reader, "registrard-setup-config");

    let defaults = request_ok(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(
        defaults
            .pointer("/registration/defaultPenaltyAmount")
            .and_then(|v| v.as_f64()),
        Some(500.0)
    );
    assert_eq!(
        defaults.pointer("/registration/maxSlipCredits").and_then(|v| v.as_i64()),
        Some(24)
    );
    assert_eq!(
        defaults.pointer("/analytics/recentGradesLimit").and_then(|v| v.as_i64()),
        Some(5)
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "registration", "patch": { "defaultPenaltyAmount": 125.456 } }),
    );
    assert_eq!(
        updated
            .pointer("/registration/defaultPenaltyAmount")
            .and_then(|v| v.as_f64()),
        Some(125.46)
    );
    let reread = request_ok(&mut stdin, &mut reader, "3", "setup.get", json!({}));
    assert_eq!(
        reread
            .pointer("/registration/defaultPenaltyAmount")
            .and_then(|v| v.as_f64()),
        Some(125.46)
    );
    assert_eq!(
        reread.pointer("/registration/maxSlipCredits").and_then(|v| v.as_i64()),
        Some(24)
    );

    let bad = [
        json!({ "section": "registration", "patch": { "maxSlipCredits": 0 } }),
        json!({ "section": "registration", "patch": { "maxSlipCredits": "many" } }),
        json!({ "section": "registration", "patch": { "defaultPenaltyAmount": -1 } }),
        json!({ "section": "registration", "patch": { "unknownKey": 1 } }),
        json!({ "section": "analytics", "patch": { "recentGradesLimit": 99 } }),
        json!({ "section": "nope", "patch": {} }),
        json!({ "section": "analytics", "patch": [] }),
    ];
    for (i, params) in bad.iter().enumerate() {
        let e = request_err(
            &mut stdin,
            &mut reader,
            &format!("bad-{}", i),
            "setup.update",
            params.clone(),
        );
        assert_eq!(error_code(&e), "bad_params", "{}", params);
    }

    // Rejected patches leave stored values alone.
    let reread = request_ok(&mut stdin, &mut reader, "4", "setup.get", json!({}));
    assert_eq!(
        reread.pointer("/analytics/recentGradesLimit").and_then(|v| v.as_i64()),
        Some(5)
    );
}
