use anyhow::Result;
use sch_sync::{
    CanonicalModel, CircuitDescription, Schematic, StaticLibrary, build_model,
    document::SymbolData,
};
use std::fs;
use std::path::{Path, PathBuf};

/// Path of a fixture under `tests/resources`.
#[allow(unused)]
pub fn get_resource_path(resource_name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/resources")
        .join(resource_name)
}

#[allow(unused)]
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The `Device` library the fixtures were drawn with.
#[allow(unused)]
pub fn device_library() -> Result<StaticLibrary> {
    let text = fs::read_to_string(get_resource_path("Device.kicad_sym"))?;
    Ok(StaticLibrary::from_kicad_sym("Device", &text)?)
}

#[allow(unused)]
pub fn model(json: &str) -> Result<CanonicalModel> {
    Ok(build_model(&CircuitDescription::from_json(json)?)?)
}

#[allow(unused)]
pub fn load(path: &Path) -> Result<Schematic> {
    Ok(Schematic::parse(path, fs::read_to_string(path)?)?)
}

#[allow(unused)]
pub fn symbol(doc: &Schematic, reference: &str) -> Option<SymbolData> {
    doc.symbols()
        .find(|(_, s)| s.reference == reference)
        .map(|(_, s)| s.clone())
}

/// Sorted file names directly inside `dir`.
#[allow(unused)]
pub fn file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}
