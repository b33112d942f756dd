//! `notirelay encode`: build a reminder frame offline, print it as hex.

use notirelay_core::packet::encode;

use crate::cli::EncodeOpts;

pub fn cmd_encode(opts: &EncodeOpts) {
    print!("{}", format_encoded(opts));
}

pub(crate) fn format_encoded(opts: &EncodeOpts) -> String {
    let encoded = encode(&opts.name, &opts.title, &opts.text, &opts.date);
    let mut out = format!("{}\n", hex::encode(&encoded.bytes));
    if encoded.is_truncated() {
        let fields: Vec<&str> = encoded.truncated.iter().map(|f| f.as_str()).collect();
        out.push_str(&format!("truncated: {}\n", fields.join(", ")));
    }
    out
}
