//! Stable identifiers derived from instance attributes.

use sha2::{Digest, Sha256};

/// Fills each `%s` placeholder of `template` with the next argument.
///
/// Placeholders without a matching argument are left as they are and
/// surplus arguments are ignored.
pub fn format_template(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut rest = template;

    while let Some(pos) = rest.find("%s") {
        out.push_str(&rest[..pos]);
        match args.next() {
            Some(arg) => out.push_str(arg),
            None => out.push_str("%s"),
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

/// Hex-encoded SHA-256 of the formatted template.
///
/// Used for instance ids, e.g.
/// `generate_id("%s_%s_%s", &[exe_path, conf_path, prefix])`.
pub fn generate_id(template: &str, args: &[&str]) -> String {
    hex::encode(Sha256::digest(format_template(template, args).as_bytes()))
}
