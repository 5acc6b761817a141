use std::fs;
use std::process::Command;

use genoblock::output::OutputReader;
use tempfile::tempdir;

const TABLE: &str = "##source=cli-test\n\
##contig=<ID=chr1,length=10000>\n\
#CONTIG\tPOS\tID\tREF\tALT\ts1\ts2\ts3\ts4\ts5\ts6\n\
chr1\t100\trs1\tA\tG\t0/0\t0/1\t1/1\t0/0\t0/1\t1/1\n\
chr1\t200\trs2\tC\tT\t0/0\t0/1\t1/1\t0/0\t0/1\t1/1\n\
chr1\t300\trs3\tG\tA\t1/1\t0/0\t0/0\t1/1\t0/0\t./.\n\
chr1\t400\trs4\tT\tC\t0/0\t0/0\t0/0\t0/0\t0/0\t0/0\n";

fn genoblock(dir: &std::path::Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_genoblock"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("run genoblock cli")
}

#[test]
fn import_index_and_calc_from_the_command_line() {
    let tmp = tempdir().expect("temporary directory");
    fs::write(tmp.path().join("table.tsv"), TABLE).expect("write table");

    let import = genoblock(tmp.path(), &["--quiet", "import", "table.tsv", "-o", "cohort"]);
    assert!(import.status.success(), "import failed: {import:?}");
    assert!(tmp.path().join("cohort.gbk").exists());

    let index = genoblock(tmp.path(), &["index", "cohort.gbk"]);
    assert!(index.status.success(), "index failed: {index:?}");
    let listing = String::from_utf8(index.stdout).expect("utf-8 listing");
    let mut lines = listing.lines();
    // rs4 is monomorphic and never stored.
    assert!(lines.next().expect("summary line").contains("variants=3"));
    assert!(lines.next().expect("column line").starts_with("BLOCK\tCHROM"));
    assert!(lines.next().expect("first block").starts_with("0\tchr1\t100\t300\t3"));

    let text = genoblock(
        tmp.path(),
        &["calc", "cohort.gbk", "-o", "pairs.txt", "--text", "--threads", "2", "--r2-min", "0.99"],
    );
    assert!(text.status.success(), "text calc failed: {text:?}");
    let pairs = fs::read_to_string(tmp.path().join("pairs.txt")).expect("text output");
    let rows: Vec<&str> = pairs.lines().collect();
    assert!(rows[0].starts_with("##source=cli-test"));
    assert!(rows[0].contains("##genoblock_calcCommand="));
    assert_eq!(rows[1], "FLAG\tCHROM_A\tPOS_A\tCHROM_B\tPOS_B\tN\tR\tR2\tCHISQ");
    // Only rs1/rs2 are perfectly linked; the pair is written both ways.
    assert_eq!(rows.len(), 4);
    assert!(rows[2..].iter().all(|row| row.split('\t').count() == 9));
    assert!(rows[2..].iter().any(|row| row.starts_with("3\tchr1\t100\tchr1\t200\t6\t1")));

    let binary = genoblock(
        tmp.path(),
        &["calc", "cohort.gbk", "-o", "pairs", "--upper-only", "--r2-min", "0"],
    );
    assert!(binary.status.success(), "binary calc failed: {binary:?}");
    let reader = OutputReader::open(&tmp.path().join("pairs.gbo")).expect("binary output");
    assert_eq!(reader.records().expect("records").len(), 3);

    let subset = genoblock(
        tmp.path(),
        &["calc", "cohort.gbk", "-o", "subset", "--upper-only", "--r2-min", "0", "--pairs", "0:0"],
    );
    assert!(subset.status.success(), "pair subset calc failed: {subset:?}");
    let reader = OutputReader::open(&tmp.path().join("subset.gbo")).expect("subset output");
    assert_eq!(reader.records().expect("records").len(), 3);

    let missing = genoblock(tmp.path(), &["calc", "cohort.gbk", "-o", "none", "--blocks", "0,5"]);
    assert!(!missing.status.success());
    assert!(String::from_utf8_lossy(&missing.stderr).contains("Error:"));
}

#[test]
fn bad_settings_fail_with_a_diagnostic() {
    let tmp = tempdir().expect("temporary directory");
    fs::write(tmp.path().join("table.tsv"), TABLE).expect("write table");
    fs::write(tmp.path().join("settings.toml"), "[import]\nmaf_min = 0.9\n").expect("write settings");

    let import = genoblock(
        tmp.path(),
        &["import", "table.tsv", "-o", "cohort", "--config", "settings.toml"],
    );
    assert!(!import.status.success());
    let stderr = String::from_utf8_lossy(&import.stderr);
    assert!(stderr.contains("Error:"), "stderr was {stderr}");
    assert!(!tmp.path().join("cohort.gbk").exists());
}
