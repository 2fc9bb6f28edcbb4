//! Register map export through scanning, resolution and decoding.

use igntc_tools::register_map::{RegisterMap, ScanError, TypeKind};
use igntc_tools::registers::{decode, Validation, Value};
use igntc_tools::schema::{resolve, ResolvedSchema};
use std::io::Write as _;
use std::path::Path;

const EXPORT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/ig-ntc-bb.txt");

fn schema() -> Vec<ResolvedSchema> {
    let map = RegisterMap::load(Path::new(EXPORT)).expect("scan");
    resolve(&map).expect("resolve")
}

fn entry<'a>(schema: &'a [ResolvedSchema], register: u32) -> &'a ResolvedSchema {
    schema.iter().find(|e| e.register == register).expect("register present")
}

#[test]
fn scans_export() {
    let map = RegisterMap::load(Path::new(EXPORT)).unwrap();
    assert_eq!(map.registers.len(), 11);
    assert_eq!(map.registers[0].datatype, "binary1");
    assert_eq!(map.registers[10].register, 43001);
    assert_eq!(map.registers[10].name, "Gen-set name");
    assert_eq!(map.types.len(), 2);
    let names = map.types.iter().map(|t| (t.name.as_str(), t.kind())).collect::<Vec<_>>();
    assert_eq!(names, [("binary1", TypeKind::Bits), ("list3", TypeKind::List)]);
    assert_eq!(map.types.get("list3").unwrap().values.len(), 5);
}

#[test]
fn resolves_export_bounds() {
    let schema = schema();
    let rpm = entry(&schema, 40010);
    assert_eq!(rpm.min, Some(0));
    assert_eq!(rpm.max, Some(4000));
    let ubat = entry(&schema, 40020);
    assert_eq!((ubat.min, ubat.max), (None, None));
    let oil = entry(&schema, 40012);
    assert!((oil.max_scaled().unwrap() - 10.0).abs() < 1e-9);
    assert!(entry(&schema, 40003).custom_type.is_some());
    assert!(entry(&schema, 40040).custom_type.is_none());
}

#[test]
fn decodes_export_registers() {
    let schema = schema();

    let rpm = decode(entry(&schema, 40010), &[1500]).unwrap();
    assert_eq!(rpm.value, Value::Scaled { raw: 1500, decimals: 0 });
    assert_eq!(rpm.validation, Validation::Pass);
    assert_eq!(decode(entry(&schema, 40010), &[4001]).unwrap().validation, Validation::Fail);

    let oil = decode(entry(&schema, 40012), &[43]).unwrap();
    assert_eq!(oil.value.to_string(), "4.3");
    assert_eq!(oil.validation, Validation::Pass);

    let state = decode(entry(&schema, 40013), &[3]).unwrap();
    assert_eq!(state.value, Value::Label("3: Running".into()));
    assert_eq!(state.validation, Validation::NotApplicable);
    assert!(decode(entry(&schema, 40013), &[9]).is_err());

    let inputs = decode(entry(&schema, 40003), &[0b101]).unwrap();
    assert_eq!(
        inputs.value,
        Value::Bitfield("Emergency stop: 1, Access lock: 0, Remote OFF: 1".into())
    );

    let hours = decode(entry(&schema, 40014), &[0x0001, 0x0000, 0, 0]).unwrap();
    assert_eq!(hours.value, Value::Scaled { raw: 65536, decimals: 0 });

    let date = decode(entry(&schema, 40030), &[0x1910]).unwrap();
    assert_eq!(date.value, Value::Hex(vec!["001910".into()]));

    let mut name = [0u16; 8];
    name[0] = u16::from_be_bytes(*b"G1");
    let decoded = decode(entry(&schema, 43001), &name).unwrap();
    assert_eq!(decoded.value, Value::Text("G1".into()));
    assert_eq!(decoded.validation, Validation::NotApplicable);
}

#[test]
fn minimal_export_end_to_end() {
    let text = [
        " Register(s)      Com.Obj. Name           Dim  Type       Len Dec   Min    Max Group",
        "",
        "40001            100      Counter        -    Integer    1   -       0    100 Values",
        "40002            101      Flags          -    Binary#2   1   -       -      - Values",
        "",
        "", "", "", "", "", "", "", "", "",
        "=====================",
        "List# Types Meaning",
        "=====================",
        "",
        "--------------------------------------------------------------------------------------",
        "Binary#2",
        "",
        "Bit  Name",
        "--------------------------------------------------------------------------------------------",
        "0   Running",
        "1   Alarm",
        "",
        "Table# Types Meaning",
    ]
    .join("\r\n");
    let map = RegisterMap::from_text(&text).unwrap();
    let schema = resolve(&map).unwrap();
    assert_eq!(schema.len(), 2);
    assert!(schema[0].custom_type.is_none());
    assert!(schema[1].custom_type.is_some());
    assert_eq!(decode(&schema[0], &[1]).unwrap().value, Value::Signed(1));
    assert_eq!(
        decode(&schema[1], &[0b01]).unwrap().value,
        Value::Bitfield("Running: 1, Alarm: 0".into())
    );
}

/// The sample export with `from` replaced by `to`, written out one byte per char.
fn legacy_export(from: &str, to: &str) -> tempfile::NamedTempFile {
    let text = String::from_utf8(std::fs::read(EXPORT).unwrap()).unwrap();
    assert!(text.contains(from));
    let bytes = text
        .replacen(from, to, 1)
        .chars()
        .map(|c| u8::try_from(u32::from(c)).expect("latin-1 only"))
        .collect::<Vec<_>>();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&bytes).unwrap();
    file
}

#[test]
fn loads_legacy_encoded_export() {
    let file = legacy_export("Oil press      bar ", "Oil temp       \u{B0}C  ");
    let map = RegisterMap::load(file.path()).unwrap();
    let oil = map.registers.iter().find(|r| r.register == 40012).unwrap();
    assert_eq!(oil.name, "Oil temp");
    assert_eq!(oil.units, "\u{B0}C");
    assert_eq!(oil.datatype, "integer");
    assert_eq!(oil.decimals, Some(1));
}

#[test]
fn legacy_byte_pairs_do_not_shift_columns() {
    // 0xEC 0x9A is a valid UTF-8 lead and continuation byte pair.
    let file = legacy_export("Oil press      bar ", "\u{EC}\u{9A}l press      bar ");
    let map = RegisterMap::load(file.path()).unwrap();
    assert_eq!(map.registers.len(), 11);
    let oil = map.registers.iter().find(|r| r.register == 40012).unwrap();
    assert_eq!(oil.name, "\u{EC}\u{9A}l press");
    assert_eq!(oil.units, "bar");
    assert_eq!(oil.datatype, "integer");
    assert_eq!(oil.decimals, Some(1));
    assert_eq!(oil.group, "Engine values");
}

#[test]
fn missing_export_is_reported() {
    let result = RegisterMap::load(Path::new("/nonexistent/export.txt"));
    assert!(matches!(result, Err(ScanError::Read(..))));
}
