use chrono::NaiveDate;

const GIB: u64 = 1024 * 1024 * 1024;

/// Whole GiB rounded up; zero bytes stays zero.
pub fn ceil_gib(size_bytes: u64) -> u64 {
    size_bytes.div_ceil(GIB)
}

/// `machine:file_name:extension:ceil(size/1GiB):scan_date`
pub fn build_urn(
    machine: &str,
    file_name: &str,
    extension: &str,
    size_bytes: u64,
    scan_date: NaiveDate,
) -> String {
    format!(
        "{machine}:{file_name}:{extension}:{}:{}",
        ceil_gib(size_bytes),
        scan_date.format("%Y-%m-%d")
    )
}

/// The trailing `YYYY-MM-DD` component of a URN, when present and valid.
pub fn scan_date_from_urn(urn: &str) -> Option<NaiveDate> {
    let (_, tail) = urn.rsplit_once(':')?;
    NaiveDate::parse_from_str(tail, "%Y-%m-%d").ok()
}
