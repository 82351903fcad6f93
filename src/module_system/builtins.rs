//! C13 — the bootstrap `__builtins__` module (spec §3 "Bootstrap",
//! §4.2 tier 0).
//!
//! Every runtime instance gets exactly one `__builtins__` module,
//! populated before any user or library code resolves, carrying the
//! three natives the module subsystem itself depends on: `print` (so
//! bootstrap diagnostics can surface without a full stdlib), `type_of`
//! (used by the loader's native-binding signature checks), and
//! `module_path_of` (used by hooks and inspection to stringify a
//! module handle). Anything beyond these three is the stdlib
//! collaborator's responsibility, not this crate's.

use crate::module_system::module::{Module, Visibility};
use crate::module_system::module_id::ModulePath;
use crate::value::{NativeFn, TaggedValue};

const BUILTINS_PATH: &str = "@__builtins__";

fn native_print(args: &[TaggedValue]) -> Result<TaggedValue, String> {
    let rendered: Vec<String> = args.iter().map(render).collect();
    println!("{}", rendered.join(" "));
    Ok(TaggedValue::Nil)
}

fn native_type_of(args: &[TaggedValue]) -> Result<TaggedValue, String> {
    let value = args.first().ok_or("type_of expects 1 argument")?;
    Ok(TaggedValue::Str(value.kind_name().into()))
}

fn native_module_path_of(args: &[TaggedValue]) -> Result<TaggedValue, String> {
    match args.first() {
        Some(TaggedValue::Module(handle)) => Ok(TaggedValue::Str(format!("module#{}", handle.0).into())),
        Some(_) => Err("module_path_of expects a module value".to_string()),
        None => Err("module_path_of expects 1 argument".to_string()),
    }
}

fn render(value: &TaggedValue) -> String {
    match value {
        TaggedValue::Nil => "nil".to_string(),
        TaggedValue::Bool(b) => b.to_string(),
        TaggedValue::Number(n) => n.to_string(),
        TaggedValue::Str(s) => s.to_string(),
        other => format!("<{}>", other.kind_name()),
    }
}

/// Builds the `__builtins__` module in its final `Loaded` state, with
/// its three natives exported and public.
pub fn bootstrap_module() -> Module {
    let module = Module::new(ModulePath::new(BUILTINS_PATH));
    module.set_version(Some("1.0.0".to_string()));

    module.export(
        "print",
        TaggedValue::Native(NativeFn::new(native_print)),
        Visibility::Public,
    );
    module.export(
        "type_of",
        TaggedValue::Native(NativeFn::new(native_type_of)),
        Visibility::Public,
    );
    module.export(
        "module_path_of",
        TaggedValue::Native(NativeFn::new(native_module_path_of)),
        Visibility::Public,
    );

    module.set_state(crate::module_system::module::ModuleState::Loaded);
    module
}

/// The canonical path of the bootstrap builtins module.
pub fn builtins_path() -> ModulePath {
    ModulePath::new(BUILTINS_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::GcHandle;

    #[test]
    fn bootstrap_module_exports_exactly_three_builtins() {
        let module = bootstrap_module();
        assert_eq!(module.export_names(), vec!["print", "type_of", "module_path_of"]);
    }

    #[test]
    fn type_of_reports_kind_name() {
        let module = bootstrap_module();
        let entry = module.get_export("type_of").unwrap();
        if let TaggedValue::Native(f) = &entry.value {
            let result = f.call(&[TaggedValue::Number(1.0)]).unwrap();
            match result {
                TaggedValue::Str(s) => assert_eq!(&*s, "number"),
                other => panic!("expected string, got {other:?}"),
            }
        } else {
            panic!("type_of is not native");
        }
    }

    #[test]
    fn module_path_of_rejects_non_module_argument() {
        let module = bootstrap_module();
        let entry = module.get_export("module_path_of").unwrap();
        if let TaggedValue::Native(f) = &entry.value {
            assert!(f.call(&[TaggedValue::Nil]).is_err());
            assert!(f.call(&[TaggedValue::Module(GcHandle(7))]).is_ok());
        } else {
            panic!("module_path_of is not native");
        }
    }
}
