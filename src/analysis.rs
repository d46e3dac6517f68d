use std::fmt;

/// Instruction-mix counters for one emulation run.
///
/// Zeroed when the machine is initialized and bumped by the executors; each
/// executed instruction lands in exactly one category bucket plus the
/// total, so `i_count` always equals the sum of the categories (branches
/// split between taken and not taken).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Analysis {
    /// Total instructions executed.
    pub i_count: u64,
    /// R-type plus I-type arithmetic.
    pub ir_count: u64,
    /// Loads.
    pub ld_count: u64,
    /// Stores.
    pub st_count: u64,
    /// Jumps, JAL and JALR combined.
    pub j_count: u64,
    /// Conditional branches that redirected the program counter.
    pub b_taken: u64,
    /// Conditional branches that fell through.
    pub b_not_taken: u64,
}

impl Analysis {
    pub(crate) fn count_ir(&mut self) {
        self.i_count += 1;
        self.ir_count += 1;
    }

    pub(crate) fn count_load(&mut self) {
        self.i_count += 1;
        self.ld_count += 1;
    }

    pub(crate) fn count_store(&mut self) {
        self.i_count += 1;
        self.st_count += 1;
    }

    pub(crate) fn count_jump(&mut self) {
        self.i_count += 1;
        self.j_count += 1;
    }

    pub(crate) fn count_branch(&mut self, taken: bool) {
        self.i_count += 1;
        if taken {
            self.b_taken += 1;
        } else {
            self.b_not_taken += 1;
        }
    }

    /// Total conditional branches, taken or not.
    pub fn branches(&self) -> u64 {
        self.b_taken + self.b_not_taken
    }
}

/// Percentage of `numer` in `denom`, 0.0 when the denominator is zero.
fn pct(numer: u64, denom: u64) -> f64 {
    if denom == 0 {
        return 0.0;
    }
    numer as f64 / denom as f64 * 100.0
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.i_count;
        let branches = self.branches();

        writeln!(f, "=== Analysis")?;
        writeln!(f, "Instructions Executed  = {total}")?;
        writeln!(
            f,
            "R-type + I-type        = {} ({:.2}%)",
            self.ir_count,
            pct(self.ir_count, total)
        )?;
        writeln!(
            f,
            "Loads                  = {} ({:.2}%)",
            self.ld_count,
            pct(self.ld_count, total)
        )?;
        writeln!(
            f,
            "Stores                 = {} ({:.2}%)",
            self.st_count,
            pct(self.st_count, total)
        )?;
        writeln!(
            f,
            "Jumps/JAL/JALR         = {} ({:.2}%)",
            self.j_count,
            pct(self.j_count, total)
        )?;
        writeln!(
            f,
            "Conditional branches   = {} ({:.2}%)",
            branches,
            pct(branches, total)
        )?;
        // branch outcomes are relative to total branches, not instructions
        writeln!(
            f,
            "  Branches taken       = {} ({:.2}%)",
            self.b_taken,
            pct(self.b_taken, branches)
        )?;
        write!(
            f,
            "  Branches not taken   = {} ({:.2}%)",
            self.b_not_taken,
            pct(self.b_not_taken, branches)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_run_renders_without_dividing_by_zero() {
        let report = Analysis::default().to_string();
        assert!(report.contains("Instructions Executed  = 0"));
        assert!(report.contains("(0.00%)"));
        assert!(!report.contains("NaN"));
    }

    #[test]
    fn branch_percentages_are_relative_to_branches() {
        let mut analysis = Analysis::default();
        analysis.count_ir();
        analysis.count_ir();
        analysis.count_branch(true);
        analysis.count_branch(false);

        let report = analysis.to_string();
        assert!(report.contains("Conditional branches   = 2 (50.00%)"));
        assert!(report.contains("Branches taken       = 1 (50.00%)"));
    }

    #[test]
    fn every_bump_keeps_the_total_in_sync() {
        let mut analysis = Analysis::default();
        analysis.count_ir();
        analysis.count_load();
        analysis.count_store();
        analysis.count_jump();
        analysis.count_branch(true);
        analysis.count_branch(false);

        assert_eq!(
            analysis.i_count,
            analysis.ir_count
                + analysis.ld_count
                + analysis.st_count
                + analysis.j_count
                + analysis.b_taken
                + analysis.b_not_taken
        );
    }
}
