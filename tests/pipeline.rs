mod common;

use std::fs;

use encoding_rs::WINDOWS_1252;
use sentencing_ingest::{
    dialect::Dialect,
    error::IngestError,
    pipeline::{self, IngestPlan, RunOptions},
    report::Fidelity,
    source::{SourceSpec, YearSource, discover_year},
};

use common::{
    FULL_LAYOUT, TestWorkspace, column, declaration, layout_variant, read_csv, sample_data,
    write_extract,
};

fn options(jobs: Option<usize>) -> RunOptions {
    RunOptions {
        encoding: WINDOWS_1252,
        jobs,
    }
}

/// FY2003 names the offense OFFTYPE2, FY2004 ships as a zip without
/// DSPLEA, FY2005 is complete, FY2006 has no INPUT statement.
fn mixed_vintages(workspace: &TestWorkspace) {
    write_extract(workspace, 2003, &layout_variant(&[], &[("OFFGUIDE", "OFFTYPE2")]), 4);

    let no_plea = layout_variant(&["DSPLEA"], &[]);
    let sas = declaration(&no_plea);
    let dat = sample_data(&no_plea, 3);
    workspace.write_zip(
        "opafy04nid.zip",
        &[
            ("OPAFY04NID/opafy04nid.sas", sas.as_bytes()),
            ("OPAFY04NID/opafy04nid.dat", dat.as_bytes()),
        ],
    );

    write_extract(workspace, 2005, FULL_LAYOUT, 5);

    workspace.write(
        "sas_fy06/opafy06nid.sas",
        "DATA opafy06; INFILE 'opafy06nid.dat'; LENGTH AGE 2; RUN;",
    );
    workspace.write("sas_fy06/opafy06nid.dat", &sample_data(FULL_LAYOUT, 2));
}

fn plan(workspace: &TestWorkspace, output: &str) -> IngestPlan {
    IngestPlan::discover(workspace.path(), 2003..=2006, workspace.path().join(output))
        .expect("discover plan")
}

#[test]
fn mixed_vintages_assemble_into_one_dataset() {
    let workspace = TestWorkspace::new();
    mixed_vintages(&workspace);
    let plan = plan(&workspace, "combined.csv");
    let dialect = Dialect::default();

    let report = pipeline::run(&plan, &dialect, options(None)).expect("run");
    assert_eq!(report.summary.total_rows, 12);
    assert_eq!(report.output.rows, 12);
    assert_eq!(report.included_years(), 3);

    let (headers, rows) = read_csv(&plan.output);
    let mut expected = dialect.variables.clone();
    expected.push("FISCAL_YEAR".to_string());
    assert_eq!(headers, expected);

    let years = column(&headers, &rows, "FISCAL_YEAR");
    assert_eq!(
        years,
        ["2003"; 4]
            .iter()
            .chain(["2004"; 3].iter())
            .chain(["2005"; 5].iter())
            .copied()
            .collect::<Vec<_>>()
    );

    // The alias year and the canonical year both populate OFFGUIDE.
    let offense = column(&headers, &rows, "OFFGUIDE");
    assert!(offense.iter().all(|value| !value.is_empty()));
    assert_eq!(offense[1], "2");

    // FY2004 keeps the DSPLEA column, entirely null.
    let plea = column(&headers, &rows, "DSPLEA");
    assert!(plea[4..7].iter().all(|value| value.is_empty()));
    assert!(plea[..4].iter().chain(&plea[7..]).all(|value| *value == "1"));
}

#[test]
fn per_year_diagnostics_separate_full_reduced_and_dropped() {
    let workspace = TestWorkspace::new();
    mixed_vintages(&workspace);
    let plan = plan(&workspace, "combined.csv");
    let report = pipeline::run(&plan, &Dialect::default(), options(Some(2))).expect("run");

    let by_year = |year: i32| {
        report
            .years
            .iter()
            .find(|diagnostic| diagnostic.fiscal_year == year)
            .expect("diagnostic for year")
    };

    let fy03 = by_year(2003);
    assert_eq!(fy03.fidelity, Fidelity::Full);
    assert_eq!(
        fy03.aliased,
        vec![("OFFGUIDE".to_string(), "OFFTYPE2".to_string())]
    );

    let fy04 = by_year(2004);
    assert_eq!(fy04.fidelity, Fidelity::Reduced);
    assert_eq!(fy04.missing, vec!["DSPLEA".to_string()]);
    assert!(fy04.source.starts_with("archive"));

    let fy06 = by_year(2006);
    assert_eq!(fy06.fidelity, Fidelity::Dropped);
    assert_eq!(fy06.error_kind, Some("no-declaration"));
    assert_eq!(fy06.rows, 0);

    let coverage = &report
        .summary
        .years
        .iter()
        .find(|year| year.fiscal_year == 2004)
        .expect("summary for 2004")
        .coverage;
    assert!(coverage.contains(&("DSPLEA".to_string(), 0.0)));
    assert!(coverage.contains(&("SENTTOT".to_string(), 100.0)));
    assert!(report.summary.years.iter().all(|year| year.fiscal_year != 2006));
}

#[test]
fn reruns_are_byte_identical_whatever_the_worker_count() {
    let workspace = TestWorkspace::new();
    mixed_vintages(&workspace);
    let plan = plan(&workspace, "combined.csv");
    let dialect = Dialect::default();

    let first = pipeline::run(&plan, &dialect, options(Some(1))).expect("sequential run");
    let first_bytes = fs::read(&plan.output).expect("read first output");
    let second = pipeline::run(&plan, &dialect, options(Some(4))).expect("parallel run");
    let second_bytes = fs::read(&plan.output).expect("read second output");

    assert_eq!(first_bytes, second_bytes);
    assert_eq!(first.output.sha256, second.output.sha256);
    assert_eq!(first.output.bytes, first_bytes.len() as u64);
    assert!(!workspace.path().join("combined.csv.partial").exists());
}

#[test]
fn exhausting_every_year_writes_nothing() {
    let workspace = TestWorkspace::new();
    workspace.write(
        "sas_fy06/opafy06nid.sas",
        "DATA opafy06; INFILE 'opafy06nid.dat'; RUN;",
    );
    workspace.write("sas_fy06/opafy06nid.dat", &sample_data(FULL_LAYOUT, 2));
    let plan = IngestPlan::discover(
        workspace.path(),
        2005..=2006,
        workspace.path().join("combined.csv"),
    )
    .expect("discover");

    let err = pipeline::run(&plan, &Dialect::default(), options(None)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<IngestError>(),
        Some(IngestError::NoUsableYears)
    ));
    assert!(!plan.output.exists());
}

#[test]
fn failed_rerun_leaves_previous_artifact_in_place() {
    let workspace = TestWorkspace::new();
    mixed_vintages(&workspace);
    let plan = plan(&workspace, "combined.csv");
    pipeline::run(&plan, &Dialect::default(), options(None)).expect("first run");
    let before = fs::read(&plan.output).expect("read output");

    let empty = IngestPlan {
        years: vec![YearSource {
            fiscal_year: 2001,
            source: None,
        }],
        ..plan.clone()
    };
    assert!(pipeline::run(&empty, &Dialect::default(), options(None)).is_err());
    assert_eq!(fs::read(&plan.output).expect("read output"), before);
}

#[test]
fn delimited_exports_join_fixed_width_years() {
    let workspace = TestWorkspace::new();
    write_extract(&workspace, 2005, FULL_LAYOUT, 2);
    workspace.write(
        "individual_fy07/slim.csv",
        "district,offtype2,senttot,newrace,age,dsplea,fiscal_year,unrelated\n\
         12,10,470,2,.,8,1999,x\n\
         3,16,24,7,41,1,1999,y\n",
    );

    let plan = IngestPlan::discover(
        workspace.path(),
        2005..=2007,
        workspace.path().join("out/combined.csv"),
    )
    .expect("discover");
    assert_eq!(plan.years[1].source, None);
    assert!(matches!(
        plan.years[2].source,
        Some(SourceSpec::Delimited { .. })
    ));

    let report = pipeline::run(&plan, &Dialect::default(), options(None)).expect("run");
    assert_eq!(report.summary.total_rows, 4);
    let fy06 = report
        .years
        .iter()
        .find(|year| year.fiscal_year == 2006)
        .expect("2006 diagnostic");
    assert_eq!(fy06.error_kind, Some("missing-artifact"));

    let (headers, rows) = read_csv(&plan.output);
    assert_eq!(column(&headers, &rows, "FISCAL_YEAR")[2..], ["2007", "2007"]);
    assert_eq!(column(&headers, &rows, "OFFGUIDE")[2..], ["10", "16"]);
    assert_eq!(column(&headers, &rows, "SENTTOT")[2..], ["470", "24"]);
    assert_eq!(column(&headers, &rows, "AGE")[2..], ["", "41"]);
    assert_eq!(column(&headers, &rows, "NEWRACE")[2..], ["2", "7"]);
    assert_eq!(column(&headers, &rows, "CRIMHIST")[2..], ["", ""]);
}

#[test]
fn broken_archives_exclude_only_their_year() {
    let workspace = TestWorkspace::new();
    write_extract(&workspace, 2005, FULL_LAYOUT, 2);
    workspace.write_bytes("opafy08nid.zip", b"PK\x03\x04 definitely not a zip");
    let sas = declaration(FULL_LAYOUT);
    workspace.write_zip("opafy09-nid.zip", &[("opafy09-nid.sas", sas.as_bytes())]);

    let plan = IngestPlan {
        output: workspace.path().join("combined.csv"),
        encoding: None,
        dialect: None,
        years: vec![
            discover_year(workspace.path(), 2005),
            discover_year(workspace.path(), 2008),
            discover_year(workspace.path(), 2009),
        ],
    };
    let report = pipeline::run(&plan, &Dialect::default(), options(None)).expect("run");
    assert_eq!(report.summary.total_rows, 2);
    for year in [2008, 2009] {
        let diagnostic = report
            .years
            .iter()
            .find(|diagnostic| diagnostic.fiscal_year == year)
            .expect("diagnostic");
        assert_eq!(diagnostic.error_kind, Some("malformed-archive"));
    }
}

#[test]
fn declarations_with_too_few_variables_are_excluded() {
    let workspace = TestWorkspace::new();
    write_extract(&workspace, 2005, FULL_LAYOUT, 2);
    let sparse = layout_variant(
        &[
            "DISTRICT", "SENTIMP", "XMINSOR", "XMAXSOR", "NEWRACE", "MONSEX", "AGE", "CITIZEN",
            "NEWEDUC", "CRIMHIST", "CRIMPTS", "WEAPON", "INOUT", "PRESENT",
        ],
        &[],
    );
    write_extract(&workspace, 2010, &sparse, 2);

    let plan = IngestPlan {
        output: workspace.path().join("combined.csv"),
        encoding: None,
        dialect: None,
        years: vec![
            discover_year(workspace.path(), 2005),
            discover_year(workspace.path(), 2010),
        ],
    };
    let report = pipeline::run(&plan, &Dialect::default(), options(None)).expect("run");
    let fy10 = &report.years[1];
    assert_eq!(fy10.fidelity, Fidelity::Dropped);
    assert_eq!(fy10.error_kind, Some("too-few-variables"));
    assert_eq!(report.summary.total_rows, 2);
}

#[test]
fn plan_files_resolve_paths_next_to_the_plan() {
    let workspace = TestWorkspace::new();
    write_extract(&workspace, 2005, FULL_LAYOUT, 3);
    let plan_path = workspace.write(
        "plan.yml",
        "output: out/combined.csv\n\
         encoding: latin1\n\
         years:\n\
         \x20 - fiscal_year: 2005\n\
         \x20   source:\n\
         \x20     kind: fixed-width\n\
         \x20     layout: sas_fy05/opafy05nid.sas\n\
         \x20     data: sas_fy05/opafy05nid.dat\n",
    );
    let plan = IngestPlan::load(&plan_path).expect("load plan");
    assert_eq!(plan.output, workspace.path().join("out/combined.csv"));
    let report = pipeline::run(&plan, &Dialect::default(), options(None)).expect("run");
    assert_eq!(report.summary.total_rows, 3);
    assert!(plan.output.exists());
}

#[test]
fn archives_zipped_on_macos_ignore_resource_forks() {
    let workspace = TestWorkspace::new();
    let sas = declaration(FULL_LAYOUT);
    let dat = sample_data(FULL_LAYOUT, 3);
    let fork: &[u8] = b"\x00\x05\x16\x07\x00\x02\x00\x00Mac OS X        ";
    workspace.write_zip(
        "opafy05nid.zip",
        &[
            ("__MACOSX/opafy05nid/._opafy05nid.sas", fork),
            ("__MACOSX/opafy05nid/._opafy05nid.dat", fork),
            ("opafy05nid/opafy05nid.sas", sas.as_bytes()),
            ("opafy05nid/opafy05nid.dat", dat.as_bytes()),
        ],
    );

    let plan = plan(&workspace, "combined.csv");
    let report = pipeline::run(&plan, &Dialect::default(), options(None)).expect("run");
    let fy05 = report
        .years
        .iter()
        .find(|year| year.fiscal_year == 2005)
        .expect("2005 diagnostic");
    assert_eq!(fy05.fidelity, Fidelity::Full);
    assert_eq!(fy05.rows, 3);
}

#[test]
fn years_without_records_are_dropped() {
    let workspace = TestWorkspace::new();
    write_extract(&workspace, 2005, FULL_LAYOUT, 2);
    workspace.write("sas_fy06/opafy06nid.sas", &declaration(FULL_LAYOUT));
    workspace.write("sas_fy06/opafy06nid.dat", "\n\r\n   \n");
    workspace.write(
        "individual_fy07/slim.csv",
        "district,offguide,senttot,newrace,age,dsplea\n",
    );

    let plan = IngestPlan::discover(
        workspace.path(),
        2005..=2007,
        workspace.path().join("combined.csv"),
    )
    .expect("discover");
    let report = pipeline::run(&plan, &Dialect::default(), options(None)).expect("run");
    assert_eq!(report.summary.total_rows, 2);
    assert_eq!(report.included_years(), 1);
    for year in [2006, 2007] {
        let diagnostic = report
            .years
            .iter()
            .find(|diagnostic| diagnostic.fiscal_year == year)
            .expect("diagnostic");
        assert_eq!(diagnostic.fidelity, Fidelity::Dropped);
        assert_eq!(diagnostic.error_kind, Some("empty-data"));
        assert_eq!(diagnostic.rows, 0);
    }
}
