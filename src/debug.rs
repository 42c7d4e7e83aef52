use std::fmt::Write as _;

/// Raw datagram dumps are enabled by the `IPMI_DEBUG` environment variable.
pub(crate) fn enabled() -> bool {
    std::env::var("IPMI_DEBUG")
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02x}");
    }
    out
}

pub(crate) fn dump_hex(label: &str, bytes: &[u8]) {
    if !enabled() {
        return;
    }

    #[cfg(feature = "tracing")]
    tracing::trace!(len = bytes.len(), bytes = %hex(bytes), "{label}");

    #[cfg(not(feature = "tracing"))]
    eprintln!("{label} ({}): {}", bytes.len(), hex(bytes));
}
