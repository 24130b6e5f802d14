//! End-to-end driver tests: namespaces, requires, protocols, deftype, the
//! test-runner macros, and output files on disk.

mod common;

use std::fs;
use std::path::PathBuf;

use yantra::driver::{Driver, DriverConfig};
use yantra::form::build::*;
use yantra::form::Form;
use yantra::reader::VecSource;
use yantra::registry::Namespace;

fn temp_driver(tag: &str) -> (Driver, PathBuf) {
    let root = std::env::temp_dir().join(format!("yantra-e2e-{tag}"));
    fs::remove_dir_all(&root).ok();
    fs::create_dir_all(root.join("src")).unwrap();
    let config = DriverConfig::new(vec![root.join("src")], root.join("target"));
    (Driver::new(config), root)
}

fn def_source(driver: &Driver, ns: &str, name: &str) -> String {
    driver
        .registry
        .namespace(ns)
        .unwrap_or_else(|| panic!("namespace {ns} missing"))
        .lookup(name)
        .unwrap_or_else(|| panic!("definition {name} missing"))
        .source
        .clone()
}

#[test]
fn requires_aliases_and_referred_symbols_resolve() {
    let (mut driver, root) = temp_driver("requires");

    // A helper namespace compiled first.
    let mut util = VecSource::new(vec![
        call("ns", vec![sym("util.str")]),
        call(
            "def",
            vec![sym("trim"), call("fn*", vec![vector(vec![sym("s")]), sym("s")])],
        ),
    ]);
    driver.compile_and_write(&mut util).unwrap();

    let mut app = VecSource::new(vec![
        call(
            "ns",
            vec![
                sym("app.main"),
                Form::List(vec![
                    kw("require"),
                    vector(vec![string("package:flutter/widgets.dart"), kw("as"), sym("w")]),
                    vector(vec![
                        sym("util.str"),
                        kw("as"),
                        sym("s"),
                        kw("refer"),
                        vector(vec![sym("trim")]),
                    ]),
                ]),
            ],
        ),
        call(
            "def",
            vec![
                sym("title"),
                call("fn*", vec![vector(vec![]), call("w/Text.", vec![string("hi")])]),
            ],
        ),
        call(
            "def",
            vec![
                sym("clean"),
                call("fn*", vec![vector(vec![sym("x")]), call("trim", vec![sym("x")])]),
            ],
        ),
        call(
            "def",
            vec![
                sym("clean2"),
                call("fn*", vec![vector(vec![sym("x")]), call("s/trim", vec![sym("x")])]),
            ],
        ),
    ]);
    let report = driver.compile_and_write(&mut app).unwrap();
    assert_eq!(report.namespace, "app.main");
    assert_eq!(report.definitions, 3);

    assert!(def_source(&driver, "app.main", "title").contains("return lib0.Text(\"hi\");"));
    assert!(def_source(&driver, "app.main", "clean").contains("return lib1.trim(x$1);"));
    assert!(def_source(&driver, "app.main", "clean2").contains("return lib1.trim(x$1);"));

    let written = fs::read_to_string(&report.output).unwrap();
    assert!(written.starts_with(
        "import \"package:flutter/widgets.dart\" as lib0;\nimport \"util/str.dart\" as lib1;\n"
    ));
    assert_eq!(report.output, root.join("target/yn_out/app/main.dart"));
}

#[test]
fn unsupported_import_specs_fail() {
    let (mut driver, _root) = temp_driver("bad-import");
    let form = call(
        "ns",
        vec![sym("app.bad"), Form::List(vec![kw("import"), sym("Foo")])],
    );
    let err = driver.compile_top_form(&form).unwrap_err();
    assert!(err.message().contains("unsupported import spec"));
}

#[test]
fn protocols_and_deftype_compile_end_to_end() {
    let (mut driver, _root) = temp_driver("protocols");
    let mut source = VecSource::new(vec![
        call("ns", vec![sym("shapes.core")]),
        call(
            "defprotocol",
            vec![
                sym("IShape"),
                Form::List(vec![sym("area"), vector(vec![sym("this")])]),
            ],
        ),
        call(
            "deftype",
            vec![
                sym("Circle"),
                vector(vec![with_tag("double", sym("r"))]),
                sym("IShape"),
                Form::List(vec![
                    sym("area"),
                    vector(vec![sym("self")]),
                    call(".*", vec![call(".-r", vec![sym("self")]), call(".-r", vec![sym("self")])]),
                ]),
            ],
        ),
    ]);
    let report = driver.compile_and_write(&mut source).unwrap();

    let marker = def_source(&driver, "shapes.core", "IShape");
    assert!(marker.contains("abstract class IShape {"), "got: {marker}");
    assert!(marker.contains("dynamic area$0();"));

    let dispatch = def_source(&driver, "shapes.core", "area");
    assert!(dispatch.contains("dynamic area(dynamic $this_$1) {"), "got: {dispatch}");
    assert!(dispatch.contains("if (($this_$1 is IShape)) {"));
    assert!(dispatch.contains("return $this_$1.area$0();"));
    assert!(dispatch.contains("UnsupportedError"));

    let circle = def_source(&driver, "shapes.core", "Circle");
    assert!(circle.contains("class Circle implements IShape {"), "got: {circle}");
    assert!(circle.contains("final double r;"));
    assert!(circle.contains("Circle(this.r);"));
    assert!(circle.contains("dynamic area$0() {\nreturn (this.r)*(this.r);\n}"));
    assert!(circle.contains(
        "dynamic noSuchMethod(Invocation invocation) => super.noSuchMethod(invocation);"
    ));

    let factory = def_source(&driver, "shapes.core", "->Circle");
    assert!(
        factory.contains("dynamic $_$GT_Circle(dynamic r$1) {\nreturn Circle(r$1);\n}"),
        "got: {factory}"
    );

    let written = fs::read_to_string(&report.output).unwrap();
    assert!(written.contains("abstract class IShape"));
    assert!(written.contains("class Circle implements IShape"));
}

#[test]
fn deftest_and_runner_main_compile_in_order() {
    let (mut driver, _root) = temp_driver("tests");
    let mut source = VecSource::new(vec![
        call("ns", vec![sym("app.test")]),
        call("deftest", vec![sym("t-one"), call("is", vec![boolean(true)])]),
        call("deftest", vec![sym("t-two"), call("is", vec![boolean(true)])]),
        call("defrunner-main", vec![]),
    ]);
    driver.compile_and_write(&mut source).unwrap();

    let one = def_source(&driver, "app.test", "t-one");
    assert!(one.contains("dynamic t_one() {"), "got: {one}");
    assert!(one.contains("throw AssertionError("));
    assert!(one.contains("rethrow;"));

    let main = def_source(&driver, "app.test", "main");
    assert!(main.contains("t_one();"), "got: {main}");
    assert!(main.contains("return t_two();"));
}

#[test]
fn loose_top_level_forms_become_load_time_definitions() {
    let (mut driver, _root) = temp_driver("loose");
    driver.compile_top_form(&call("ns", vec![sym("app.side")])).unwrap();
    driver
        .compile_top_form(&call(
            "def",
            vec![sym("log"), call("fn*", vec![vector(vec![sym("m")]), sym("m")])],
        ))
        .unwrap();
    driver
        .compile_top_form(&call("log", vec![string("booting")]))
        .unwrap();

    let init = def_source(&driver, "app.side", "top-init-1");
    assert_eq!(init, "final top_init_1 = log(\"booting\");\n");
}

#[test]
fn namespace_records_round_trip_through_serde() {
    let (mut driver, _root) = temp_driver("serde");
    let mut source = VecSource::new(vec![
        call("ns", vec![sym("app.snap")]),
        call(
            "def",
            vec![sym("x"), string("a doc"), int(42)],
        ),
    ]);
    driver.compile_and_write(&mut source).unwrap();

    let ns = driver.registry.namespace("app.snap").unwrap();
    let json = serde_json::to_string(ns).unwrap();
    assert!(json.contains("\"x\""));
    assert!(json.contains("a doc"));
    let back: Namespace = serde_json::from_str(&json).unwrap();
    assert_eq!(&back, ns);
}

#[test]
fn whole_tree_enumeration_is_sorted_and_shadowed() {
    let (driver, root) = temp_driver("enumerate");
    fs::create_dir_all(root.join("src/app")).unwrap();
    fs::write(root.join("src/app/zeta.yn"), "").unwrap();
    fs::write(root.join("src/app/alpha.ync"), "").unwrap();
    let found = driver.enumerate_namespaces();
    let names: Vec<&str> = found.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["app.alpha", "app.zeta"]);
}
