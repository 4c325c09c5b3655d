/// Documented exit codes for `testpost`.
///
/// CI pipelines key off these values, so they must not change.
pub enum ExitCode {}

impl ExitCode {
    /// Everything was published, or publishing failed but the local fallback
    /// scan found zero failures, or no result files existed and the upstream
    /// step succeeded.
    pub const OK: i32 = 0;

    /// The run cannot be counted as successful: publishing failed and the
    /// fallback scan found no xUnit totals, or no result files existed and
    /// the upstream step failed.
    pub const RUN_FAILED: i32 = 1;

    /// Publishing failed and the fallback scan counted failing tests in the
    /// raw xUnit totals.
    pub const FAILURES_FOUND: i32 = 2;

    /// An unexpected error escaped the run.
    pub const UNHANDLED_ERROR: i32 = 3;
}
