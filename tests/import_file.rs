// パス: tests/import_file.rs
// 役割: 実ファイルからの Import と起動スクリプトの統合テスト
// 意図: FsIo を入れ子の Import や存在しないファイルまで通して検証する
// 関連ファイル: src/repl/cmd.rs, src/repl/session.rs, tests/test_support.rs
#[path = "test_support.rs"]
mod support;

use std::fs;
use std::path::Path;

use fxrepl::repl::{FsIo, ReplOptions};
use pretty_assertions::assert_eq;
use support::{plain_options, run_session, ScriptedLineSource};

fn write(dir: &Path, name: &str, text: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, text).expect("write script");
    path.to_string_lossy().into_owned()
}

#[test]
/// 入れ子の Import は呼び出し元の途中に展開される。
fn nested_imports_run_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let inner = write(dir.path(), "inner.fx", "Set(x, x + 1)\n");
    let outer = write(
        dir.path(),
        "outer.fx",
        &format!("Set(x, 2)\nImport(\"{inner}\")\nx * 10\n"),
    );
    let import = format!("Import(\"{outer}\")");
    let mut src = ScriptedLineSource::interactive(&[import.as_str(), "x"]);
    let (out, err) = run_session(&mut src, &FsIo, &plain_options());
    let expected = format!(
        ">> Set(x, 2)\nx: 2\n>> Import(\"{inner}\")\n>> Set(x, x + 1)\nx: 3\n>> x * 10\n30\n3\n"
    );
    assert_eq!(out, expected);
    assert_eq!(err, "");
}

#[test]
fn missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.fx").to_string_lossy().into_owned();
    let import = format!("Import(\"{path}\")");
    let mut src = ScriptedLineSource::interactive(&[import.as_str(), "1 + 1"]);
    let (out, _) = run_session(&mut src, &FsIo, &plain_options());
    assert_eq!(out, format!("Error: File not found: {path}\n2\n"));
}

#[test]
/// 起動スクリプトで定義した数式は対話入力から使える。
fn startup_script_defines_formulas() {
    let dir = tempfile::tempdir().unwrap();
    let script = write(dir.path(), "init.fx", "Set(rate, 2)\nScaled = rate * 5\n");
    let options = ReplOptions {
        scripts: vec![script],
        ..plain_options()
    };
    let mut src = ScriptedLineSource::interactive(&["Set(rate, 3)"]);
    let (out, _) = run_session(&mut src, &FsIo, &options);
    assert_eq!(
        out,
        ">> Set(rate, 2)\nrate: 2\n>> Scaled = rate * 5\nScaled: 10\nrate: 3\nScaled: 15\n"
    );
}

#[test]
fn batch_mode_skips_interactive_input() {
    let dir = tempfile::tempdir().unwrap();
    let script = write(dir.path(), "only.fx", "\"done\"\n");
    let options = ReplOptions {
        scripts: vec![script],
        batch: true,
        ..plain_options()
    };
    let mut src = ScriptedLineSource::interactive(&["1"]);
    let (out, _) = run_session(&mut src, &FsIo, &options);
    assert_eq!(out, ">> \"done\"\n\"done\"\n");
    assert_eq!(src.remaining(), 1);
}
