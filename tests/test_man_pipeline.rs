use approx::assert_relative_eq;
use chrono::NaiveDate;
use narwhal::io::{remove_duplicate_rows, InMemoryGranuleReader, AERONET_DEDUP_KEYS};
use narwhal::{
    BandExtract, CsvValidationSource, Field, MatchupConfig, MatchupOrchestrator, RuleSet, SourceKind,
    SwathGranule, ValidationSource, VariableSelector,
};
use ndarray::{Array2, Array3};
use std::fs;
use std::path::{Path, PathBuf};

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()
}

fn write_cruise(root: &Path) {
    let dir = root.join("20240302");
    fs::create_dir_all(&dir).unwrap();
    // Second row repeats the first measurement; 1.2 - λ/1000 spectra
    fs::write(
        dir.join("Ship_A.csv"),
        "AERONET_Site,Date(dd:mm:yyyy),Time(hh:mm:ss),Latitude,Longitude,AOD_440nm,AOD_500nm,AOD_675nm,AOD_870nm\n\
         Ship_A,02:03:2024,13:50:00,20.05,-157.95,0.76,0.7,0.525,0.33\n\
         Ship_A,02:03:2024,13:50:00,20.05,-157.95,0.76,0.7,0.525,0.33\n\
         Ship_A,02:03:2024,18:00:00,20.15,-157.85,0.86,0.8,0.625,0.43\n",
    )
    .unwrap();
}

fn granule() -> SwathGranule {
    let (_, time) = narwhal::io::granule_timestamp("PACE_OCI.20240302T140000.L2.nc").unwrap();
    SwathGranule {
        id: "20240302T140000".to_string(),
        time,
        longitude: Array2::from_shape_fn((30, 30), |(_, c)| -158.0 + c as f64 * 0.01),
        latitude: Array2::from_shape_fn((30, 30), |(r, _)| 20.0 + r as f64 * 0.01),
        fields: vec![
            Field::grid("chi2", Array2::from_elem((30, 30), 0.5)),
            Field::banded("aot", Array3::from_elem((30, 30, 3), 0.4)),
        ],
        wavelengths: vec![440.0, 550.0, 670.0],
    }
}

#[test]
fn test_man_rows_become_sites_after_dedup() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    write_cruise(dir.path());

    let cleaned = remove_duplicate_rows(dir.path(), &AERONET_DEDUP_KEYS).unwrap();
    assert_eq!(cleaned, vec!["Ship_A".to_string()]);

    let source = CsvValidationSource::new(dir.path(), SourceKind::Man)
        .with_selector(VariableSelector::aeronet_aod(vec![550.0]));
    let sites = source.load_sites(day()).unwrap();
    let names: Vec<_> = sites.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Ship_A_p0", "Ship_A_p1"]);

    let mut reader = InMemoryGranuleReader::new();
    reader.insert("PACE_OCI.20240302T140000.L2.nc", granule());

    let config = MatchupConfig {
        search_grid_delta: 2,
        delta_hour: 1.0,
        band_extracts: vec![BandExtract {
            field: "aot".to_string(),
            wavelength: 550.0,
        }],
        rules: RuleSet::new().with_range("chi2", 0.0, 2.0),
        ..MatchupConfig::default()
    };
    let mut orchestrator = MatchupOrchestrator::new(config, reader, source);
    let outcome = orchestrator
        .run(day(), &[PathBuf::from("PACE_OCI.20240302T140000.L2.nc")])
        .unwrap();

    // Both ship positions fall on the swath; only the 13:50 one is within the hour
    assert_eq!(outcome.report.accepted_matches, 2);
    assert_eq!(outcome.pairs.len(), 1);

    let pair = &outcome.pairs[0];
    assert_eq!(pair.satellite_mean.geo.site, "Ship_A_p0");
    assert_eq!(pair.satellite_mean.values.get("count"), Some(25.0));
    assert_eq!(pair.satellite_mean.values.get("aot550"), Some(0.4));
    assert_eq!(pair.satellite_mean.values.get("aot_wv550"), Some(0.4));
    assert_eq!(pair.validation_mean.count, 1);
    assert_relative_eq!(pair.validation_mean.values.get("aot_wv550").unwrap(), 0.65, epsilon = 1e-9);
    assert!(pair.validation_std.values.get("aot_wv550").unwrap().is_nan());
}
