use anyhow::Result;
use sch_sync::{Design, Schematic, StaticGeometry, SyncConfig, SyncContext, synchronize};
use std::fs;

mod helpers;
use helpers::*;

const TWO_TWINS: &str = r#"(kicad_sch
	(version 20231120)
	(generator "eeschema")
	(uuid "0b7c1d52-4f0e-4a43-9d0e-5a1f0c2b3d40")
	(paper "A4")
	(lib_symbols)
	(symbol
		(lib_id "Device:R")
		(at 50.8 50.8 0)
		(unit 1)
		(uuid "0b7c1d52-4f0e-4a43-9d0e-5a1f0c2b3d41")
		(property "Reference" "R1"
			(at 52.07 50.8 0)
		)
		(property "Value" "10k"
			(at 49.53 50.8 90)
		)
		(property "Footprint" ""
			(at 50.8 50.8 0)
		)
	)
	(symbol
		(lib_id "Device:R")
		(at 76.2 50.8 0)
		(unit 1)
		(uuid "0b7c1d52-4f0e-4a43-9d0e-5a1f0c2b3d42")
		(property "Reference" "R2"
			(at 77.47 50.8 0)
		)
		(property "Value" "10k"
			(at 74.93 50.8 90)
		)
		(property "Footprint" ""
			(at 76.2 50.8 0)
		)
	)
)
"#;

#[test]
fn fixtures_round_trip_byte_for_byte() -> Result<()> {
    for name in ["divider/divider.kicad_sch", "hier/top.kicad_sch", "hier/sub.kicad_sch"] {
        let path = get_resource_path(name);
        let source = fs::read_to_string(&path)?;
        let doc = Schematic::parse(&path, source.clone())?;
        assert!(!doc.is_modified());
        assert_eq!(doc.serialize(), source, "{name}");
    }

    let design = Design::load(&get_resource_path("hier/top.kicad_sch"))?;
    assert_eq!(design.sheets().count(), 2);
    assert!(design.render()?.is_empty());
    Ok(())
}

#[test]
fn fixture_contents_are_read() -> Result<()> {
    let doc = load(&get_resource_path("divider/divider.kicad_sch"))?;
    let r1 = symbol(&doc, "R1").unwrap();
    assert_eq!(r1.lib_id, "Device:R");
    assert_eq!(r1.value, "10k");
    assert_eq!(r1.footprint, "");
    assert_eq!(symbol(&doc, "C1").unwrap().value, "100nF");

    let texts: Vec<_> = doc.labels().map(|(_, l)| l.text.as_str()).collect();
    assert_eq!(texts, ["DATA", "DATA"]);
    assert!(doc.has_lib_symbol("Device:C"));
    Ok(())
}

#[test]
fn twins_without_a_reference_are_replaced_with_a_warning() -> Result<()> {
    init_logging();
    let design = Design::new(Schematic::parse("twins.kicad_sch", TWO_TWINS.to_string())?);
    let model = model(
        r#"{"name": "twins", "root": {"components": [
            {"name": "a", "symbol": "Device:R", "value": "10k"}
        ]}}"#,
    )?;
    let library = device_library()?;
    let oracle = StaticGeometry::new();
    let mut ctx = SyncContext::new(SyncConfig::default(), &oracle, &library);

    let outcome = synchronize(&mut ctx, Some(design), &model)?;
    insta::assert_snapshot!(outcome.report.to_string(), @r"
    Add: R1
    ⚠️ Remove: R1 (not found in code)
    ⚠️ Remove: R2 (not found in code)
    ⚠️ ambiguous match for /:a: 2 candidates share its fingerprint
    ");

    let rendered = outcome.design.render()?;
    assert_eq!(rendered.len(), 1);
    let doc = Schematic::parse("twins.kicad_sch", rendered[0].1.clone())?;
    let symbols: Vec<_> = doc.symbols().map(|(_, s)| s.reference.clone()).collect();
    assert_eq!(symbols, ["R1"]);
    assert!(doc.has_lib_symbol("Device:R"));
    Ok(())
}

#[test]
fn awkward_property_values_survive_a_write() -> Result<()> {
    init_logging();
    let value = r#"4.7k "1%" C:\lib"#;
    let model = model(
        r#"{"name": "esc", "root": {"components": [
            {"name": "r", "reference": "R1", "symbol": "Device:R", "value": "4.7k \"1%\" C:\\lib"}
        ]}}"#,
    )?;
    let library = device_library()?;
    let oracle = StaticGeometry::new();

    let mut ctx = SyncContext::new(SyncConfig::default(), &oracle, &library);
    let outcome = synchronize(&mut ctx, None, &model)?;
    let rendered = outcome.design.render()?;
    assert_eq!(rendered.len(), 1);
    let (path, text) = &rendered[0];
    assert_eq!(path.file_name().unwrap(), "esc.kicad_sch");

    let doc = Schematic::parse(path, text.clone())?;
    assert_eq!(symbol(&doc, "R1").unwrap().value, value);

    let mut ctx = SyncContext::new(SyncConfig::default(), &oracle, &library);
    let again = synchronize(&mut ctx, Some(Design::new(doc)), &model)?;
    assert!(again.changeset.is_empty(), "{}", again.report);
    Ok(())
}
