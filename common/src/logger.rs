use redox_log::{OutputBuilder, RedoxLogger};

/// Installs the global logger for a driver subsystem.
///
/// Output goes to stderr, filtered at `level`. On Redox the records are also written to the
/// logging scheme under `category/subcategory`. Installing a second logger fails and is reported
/// to stderr rather than treated as fatal.
#[cfg_attr(not(target_os = "redox"), allow(unused_variables, unused_mut))]
pub fn setup_logging(category: &str, subcategory: &str, level: log::LevelFilter) {
    let mut logger = RedoxLogger::new().with_output(
        OutputBuilder::stderr()
            .with_filter(level)
            .with_ansi_escape_codes()
            .flush_on_newline(true)
            .build(),
    );

    #[cfg(target_os = "redox")]
    match OutputBuilder::in_redox_logging_scheme(
        category,
        subcategory,
        format!("{subcategory}.log"),
    ) {
        Ok(b) => logger = logger.with_output(b.with_filter(level).flush_on_newline(true).build()),
        Err(error) => eprintln!("Failed to create {subcategory}.log: {}", error),
    }

    if let Err(error) = logger.enable() {
        eprintln!("{category}/{subcategory}: failed to set default logger: {}", error);
    }
}
