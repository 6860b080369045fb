use super::*;

#[test]
fn defaults_are_valid() {
    let cfg = Config::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.db_count, DEFAULT_DB_COUNT);
}

#[test]
fn loads_from_yaml() {
    let yaml = "cache_flush_delay: 5\nio_threads_max: 8\n";
    let cfg: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(cfg.cache_flush_delay, 5);
    assert_eq!(cfg.io_threads_max, 8);
    // fields not present in the document keep their defaults
    assert_eq!(cfg.db_count, DEFAULT_DB_COUNT);
}

#[test]
fn rejects_zero_db_count() {
    let mut cfg = Config::default();
    cfg.db_count = 0;
    assert!(cfg.validate().is_err());
}
