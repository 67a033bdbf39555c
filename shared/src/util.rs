use crate::models::PrinterKind;

/// 获取当前 UTC 时间戳（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a printer id of the form `<kind>_<timestamp>_<random>`.
///
/// The timestamp is milliseconds since the Unix epoch and the suffix is
/// six lowercase alphanumerics, e.g. `radio_1729000000000_k3j9x2`.
pub fn printer_id(kind: PrinterKind) -> String {
    use rand::Rng;
    use rand::distributions::Alphanumeric;

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}_{}_{}", kind.id_prefix(), now_millis(), suffix)
}
