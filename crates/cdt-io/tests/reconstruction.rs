use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use cdt_core::CdtError;
use cdt_io::{load_cells, write_cell, AdapterContext, SourceKind};
use serde_json::json;
use zip::write::FileOptions;
use zip::ZipWriter;

/// One CALCE `.txt` export: `cycles` cycles of 1 A charge then 1 A
/// discharge, 60 samples ten seconds apart each way.
fn calce_txt(cycles: u32) -> String {
    let mut text = String::from("Time\tCharge count\tmA\tmV\n");
    let mut t = 0.0;
    for c in 0..cycles {
        let count = 2 * c;
        for step in 0..120 {
            let (charge_count, ma, mv) = if step < 60 {
                (count, 1000.0, 3700.0 + step as f64)
            } else {
                (count + 1, -1000.0, 3760.0 - step as f64)
            };
            text.push_str(&format!("{t}\t{charge_count}\t{ma}\t{mv}\n"));
            t += 10.0;
        }
    }
    text
}

const CALCE_FILES: [&str; 3] = ["CS2_35_8_19_10.txt", "CS2_35_10_5_10.txt", "CS2_35_1_10_11.txt"];

fn write_calce_dir(dir: &Path) {
    let cell = dir.join("CS2_35");
    fs::create_dir_all(&cell).unwrap();
    // listed in an order that is not chronological
    for name in CALCE_FILES.iter().rev() {
        fs::write(cell.join(name), calce_txt(2)).unwrap();
    }
}

fn write_calce_zip(dir: &Path) {
    let file = File::create(dir.join("CS2_36.zip")).unwrap();
    let mut zip = ZipWriter::new(file);
    for name in CALCE_FILES {
        let name = name.replace("CS2_35", "CS2_36");
        zip.start_file(format!("CS2_36/{name}"), FileOptions::default()).unwrap();
        zip.write_all(calce_txt(2).as_bytes()).unwrap();
    }
    zip.start_file("__MACOSX/._CS2_36_8_19_10.txt", FileOptions::default()).unwrap();
    zip.write_all(b"junk").unwrap();
    zip.finish().unwrap();
}

#[test]
fn calce_directory_and_zip_reconstruct_in_date_order() {
    let raw = tempfile::tempdir().unwrap();
    write_calce_dir(raw.path());
    write_calce_zip(raw.path());

    let ctx = AdapterContext::new();
    let units = SourceKind::Calce.discover(raw.path(), &ctx).unwrap();
    let ids: Vec<&str> = units.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["CS2_35", "CS2_36"]);

    for unit in &units {
        let cells = SourceKind::Calce.process(unit, &ctx).unwrap();
        assert_eq!(cells.len(), 1);
        let record = &cells[0].record;
        // charge counts 2k and 2k+1 share a cycle; every file holds 2 cycles
        assert_eq!(record.cycle_data.len(), 6);
        let numbers: Vec<u32> = record.cycle_data.iter().map(|c| c.cycle_number).collect();
        assert_eq!(numbers, (1..=6).collect::<Vec<_>>());
        assert_eq!(record.nominal_capacity_ah, Some(1.1));
        for cycle in &record.cycle_data {
            assert_eq!(cycle.len(), 120);
            assert!(cycle.capacities_monotone());
        }
    }
}

#[test]
fn processed_cells_round_trip_through_the_store() {
    let raw = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_calce_dir(raw.path());
    let ctx = AdapterContext::new();
    let units = SourceKind::Calce.discover(raw.path(), &ctx).unwrap();
    let cells = SourceKind::Calce.process(&units[0], &ctx).unwrap();
    write_cell(out.path(), &cells[0].record).unwrap();

    let loaded = load_cells(out.path()).unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0], cells[0].record);
}

fn matr_cell(cycles: usize, life: f64) -> serde_json::Value {
    let cycle = json!({
        "I": [0.0, -4.4, -4.4],
        "Qc": [0.0, 0.0, 0.0],
        "Qd": [0.0, 0.5, 1.0],
        "V": [3.5, 3.0, 2.0],
        "T": [30.0, 31.0, 32.0],
        "t": [0.0, 5.0, 10.0],
        "Qdlin": [0.0, 0.5, 1.0]
    });
    json!({
        "cycle_life": life,
        "policy_readable": "3.6C(80%)-3.6C",
        "summary": {
            "IR": vec![0.016; cycles],
            "cycle": (1..=cycles).collect::<Vec<_>>()
        },
        "cycles": vec![cycle; cycles]
    })
}

fn write_matr(dir: &Path, key: &str, cycles: usize) {
    let batch = dir.join(format!("batch{}", &key[1..2]));
    fs::create_dir_all(&batch).unwrap();
    let text = serde_json::to_string(&matr_cell(cycles, 500.0)).unwrap();
    fs::write(batch.join(format!("{key}.json")), text).unwrap();
}

#[test]
fn matr_continuation_is_spliced_into_its_head() {
    let raw = tempfile::tempdir().unwrap();
    write_matr(raw.path(), "b1c0", 4);
    write_matr(raw.path(), "b2c7", 3);
    write_matr(raw.path(), "b2c1", 5);

    let ctx = AdapterContext::new();
    let units = SourceKind::Matr.discover(raw.path(), &ctx).unwrap();
    let ids: Vec<&str> = units.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["b1c0", "b2c1"]);
    assert_eq!(units[0].inputs.len(), 2);

    let cells = SourceKind::Matr.process(&units[0], &ctx).unwrap();
    let record = &cells[0].record;
    assert_eq!(record.cell_id, "MATR_b1c0");
    // 4 + 3 cycles, the formation cycle removed
    assert_eq!(record.cycle_data.len(), 6);
    assert_eq!(record.cycle_data.last().unwrap().cycle_number, 6);
    assert!(record.description.as_deref().unwrap().contains("1162"));
}

#[test]
fn half_present_continuation_fails_discovery() {
    let raw = tempfile::tempdir().unwrap();
    write_matr(raw.path(), "b1c1", 4);

    let err = SourceKind::Matr
        .discover(raw.path(), &AdapterContext::new())
        .unwrap_err();
    let typed = err.downcast_ref::<CdtError>().unwrap();
    assert!(typed.is_batch_fatal());
    assert!(err.to_string().contains("b2c8"));
}
