#![no_main]

use std::sync::LazyLock;

use libfuzzer_sys::fuzz_target;

use switchboard::validation::{FieldSpec, Format, Schema};

// One schema touching every field type and constraint kind, so a single
// input exercises the whole validator surface.
static FUZZ_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new()
        .field(
            "text",
            FieldSpec::string().required().min_length(1).max_length(64),
        )
        .field("count", FieldSpec::integer().min(1.0).max(100.0))
        .field("ratio", FieldSpec::number().min(-1.0).max(1.0))
        .field("flag", FieldSpec::boolean())
        .field("mode", FieldSpec::string().allowed(&["encode", "decode"]))
        .field("link", FieldSpec::string().format(Format::Url))
        .field("contact", FieldSpec::string().format(Format::Email))
        .field("tags", FieldSpec::array().max_length(8))
        .field("extra", FieldSpec::object())
});

fuzz_target!(|data: &str| {
    // Validation accepts or rejects; it must never panic on any input.
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(data) {
        let _ = FUZZ_SCHEMA.validate(&map);
    }

    // Format matchers take raw untrusted strings straight off the wire.
    for format in [
        Format::Email,
        Format::Url,
        Format::Phone,
        Format::HexColor,
        Format::Uuid,
        Format::Jwt,
        Format::Ip,
        Format::Base64,
    ] {
        let _ = format.matches(data);
    }
});
