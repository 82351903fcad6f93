//! End-to-end scenarios exercising resolution, loading, caching, and
//! unloading together, the way a host runtime actually drives this
//! crate rather than one component in isolation.

use tempfile::TempDir;
use vesper_modules::bytecode::Chunk;
use vesper_modules::module_system::format::{ExportKind, ExportRecord, ModuleWriter};
use vesper_modules::module_system::loader::Executor;
use vesper_modules::module_system::module::{Module, Visibility};
use vesper_modules::module_system::{ModuleLoader, Result, ResolverConfig};
use vesper_modules::value::{GcHandle, TaggedValue};

struct RecordingExecutor;

impl Executor for RecordingExecutor {
    fn execute(
        &self,
        module: &Module,
        _chunk: &Chunk,
        export_specs: &[ExportRecord],
    ) -> Result<()> {
        for (i, spec) in export_specs.iter().enumerate() {
            module.export(&spec.name, TaggedValue::Function(GcHandle(i as u64)), Visibility::Public);
        }
        Ok(())
    }
}

fn write_module(dir: &std::path::Path, name: &str, exports: &[&str], imports: &[(&str, &str)]) {
    let mut w = ModuleWriter::new();
    w.add_metadata(name, "1.0.0");
    for e in exports {
        w.add_export(e, ExportKind::Function, 0, "()->Int");
    }
    for (module, export) in imports {
        w.add_import(module, export, None);
    }
    w.add_bytecode(&Chunk::empty().serialize());
    std::fs::write(dir.join(format!("{name}.vbc")), w.finalize()).unwrap();
}

#[test]
fn diamond_dependency_loads_each_module_once() {
    let dir = TempDir::new().unwrap();
    write_module(dir.path(), "base", &["value"], &[]);
    write_module(dir.path(), "left", &["left_value"], &[("@base", "value")]);
    write_module(dir.path(), "right", &["right_value"], &[("@base", "value")]);
    write_module(
        dir.path(),
        "top",
        &["top_value"],
        &[("@left", "left_value"), ("@right", "right_value")],
    );

    let loader = ModuleLoader::new(
        ResolverConfig {
            system_search_paths: vec![dir.path().to_path_buf()],
            application_root: None,
            application_container: None,
        },
        RecordingExecutor,
    );

    let top = loader.load("@top").unwrap();
    assert!(top.get_export("top_value").is_some());

    // `base` was reached via both `left` and `right`; it should have
    // been loaded exactly once and retained twice.
    let base = loader.load("@base").unwrap();
    assert_eq!(base.ref_count(), 3);
}

#[test]
fn circular_imports_both_finish_loading() {
    let dir = TempDir::new().unwrap();
    write_module(dir.path(), "a", &["a_export"], &[("@b", "b_export")]);
    write_module(dir.path(), "b", &["b_export"], &[("@a", "a_export")]);

    let loader = ModuleLoader::new(
        ResolverConfig {
            system_search_paths: vec![dir.path().to_path_buf()],
            application_root: None,
            application_container: None,
        },
        RecordingExecutor,
    );

    let a = loader.load("@a").unwrap();
    let b = loader.load("@b").unwrap();
    assert!(a.get_export("a_export").is_some());
    assert!(b.get_export("b_export").is_some());
}

#[test]
fn release_then_unload_drains_every_loaded_module() {
    let dir = TempDir::new().unwrap();
    for i in 0..5 {
        write_module(dir.path(), &format!("m{i}"), &["v"], &[]);
    }

    let loader = ModuleLoader::new(
        ResolverConfig {
            system_search_paths: vec![dir.path().to_path_buf()],
            application_root: None,
            application_container: None,
        },
        RecordingExecutor,
    );

    let paths: Vec<_> = (0..5)
        .map(|i| {
            let m = loader.load(&format!("@m{i}")).unwrap();
            let p = m.path.clone();
            loader.release(&p);
            p
        })
        .collect();

    assert_eq!(loader.cache().len(), 5 + 1); // +1 for __builtins__

    for path in &paths {
        loader.unload(path, false).unwrap();
    }
    assert_eq!(loader.cache().len(), 1);
}

#[test]
fn lru_trim_evicts_unreferenced_modules_under_pressure() {
    let dir = TempDir::new().unwrap();
    for i in 0..4 {
        write_module(dir.path(), &format!("m{i}"), &["v"], &[]);
    }

    // Capacity 2 plus the pre-seeded `__builtins__` entry: loading four
    // modules and releasing each immediately forces every earlier one
    // out once it's no longer the most recently touched.
    let loader = ModuleLoader::with_cache_capacity(
        ResolverConfig {
            system_search_paths: vec![dir.path().to_path_buf()],
            application_root: None,
            application_container: None,
        },
        RecordingExecutor,
        2,
    );

    for i in 0..4 {
        let path = format!("@m{i}");
        let m = loader.load(&path).unwrap();
        loader.release(&m.path.clone());
    }

    assert!(loader.cache().len() <= 2);
    // The most recently loaded module survives the trim.
    assert!(loader.cache().contains(&loader.load("@m3").unwrap().path));
}

#[test]
fn archive_round_trip_through_loader() {
    use vesper_modules::module_system::archive::ArchiveWriter;

    let mut module_writer = ModuleWriter::new();
    module_writer.add_metadata("packaged", "1.0.0");
    module_writer.add_export("go", ExportKind::Function, 0, "()->Int");
    module_writer.add_bytecode(&Chunk::empty().serialize());

    let mut archive = ArchiveWriter::new();
    archive.add_module("@packaged", module_writer.finalize());
    let bytes = archive.finalize().unwrap();

    let dir = TempDir::new().unwrap();
    let archive_path = dir.path().join("bundle.vesparc");
    std::fs::write(&archive_path, bytes).unwrap();

    let loader = ModuleLoader::new(
        ResolverConfig {
            system_search_paths: Vec::new(),
            application_root: None,
            application_container: Some(archive_path),
        },
        RecordingExecutor,
    );

    let m = loader.load("@packaged").unwrap();
    assert!(m.get_export("go").is_some());
}
