// ========================================================================================
//                     Pairwise genotype association (linkage disequilibrium)
// ========================================================================================

use crate::output::record::{ResultPayload, push_f64, push_u64};
use crate::types::Run;

pub const FLAG_SAME_CONTIG: u16 = 1;
pub const FLAG_SAME_BLOCK: u16 = 1 << 1;
pub const FLAG_HAS_MISSING: u16 = 1 << 2;

/// Joint genotype counts of two variants over the samples called in both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairTable {
    pub counts: [[u64; 3]; 3],
    /// Samples missing in either variant.
    pub missing: u64,
}

impl PairTable {
    /// Merges two run lists over the same samples without expanding either.
    pub fn from_runs(a: &[Run], b: &[Run]) -> Self {
        let mut table = Self::default();
        let (mut ia, mut ib) = (0, 0);
        let (mut left_a, mut left_b) = (
            a.first().map_or(0, |run| run.length),
            b.first().map_or(0, |run| run.length),
        );
        while ia < a.len() && ib < b.len() {
            let overlap = left_a.min(left_b);
            match (a[ia].genotype.alt_dosage(), b[ib].genotype.alt_dosage()) {
                (Some(x), Some(y)) => table.counts[x as usize][y as usize] += overlap,
                _ => table.missing += overlap,
            }
            left_a -= overlap;
            left_b -= overlap;
            if left_a == 0 {
                ia += 1;
                left_a = a.get(ia).map_or(0, |run| run.length);
            }
            if left_b == 0 {
                ib += 1;
                left_b = b.get(ib).map_or(0, |run| run.length);
            }
        }
        table
    }

    pub fn called(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }
}

/// The statistic emitted for one variant pair: dosage correlation and its trend test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LdHelper {
    pub n: u64,
    pub r: f64,
    pub r2: f64,
    pub chisq: f64,
    pub flags: u16,
}

impl LdHelper {
    pub fn from_table(table: &PairTable, same_contig: bool, same_block: bool) -> Self {
        let mut sums = [0.0f64; 5]; // x, y, xx, yy, xy
        for (x, row) in table.counts.iter().enumerate() {
            for (y, &count) in row.iter().enumerate() {
                let (x, y, count) = (x as f64, y as f64, count as f64);
                sums[0] += count * x;
                sums[1] += count * y;
                sums[2] += count * x * x;
                sums[3] += count * y * y;
                sums[4] += count * x * y;
            }
        }
        let n = table.called();
        let nf = n as f64;
        let cov = nf * sums[4] - sums[0] * sums[1];
        let var_x = nf * sums[2] - sums[0] * sums[0];
        let var_y = nf * sums[3] - sums[1] * sums[1];
        let r = if var_x > 0.0 && var_y > 0.0 {
            (cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let r2 = r * r;

        let mut flags = 0;
        if same_contig {
            flags |= FLAG_SAME_CONTIG;
        }
        if same_block {
            flags |= FLAG_SAME_BLOCK;
        }
        if table.missing > 0 {
            flags |= FLAG_HAS_MISSING;
        }
        Self {
            n,
            r,
            r2,
            chisq: nf * r2,
            flags,
        }
    }

    pub fn compute(a: &[Run], b: &[Run], same_contig: bool, same_block: bool) -> Self {
        Self::from_table(&PairTable::from_runs(a, b), same_contig, same_block)
    }
}

impl ResultPayload for LdHelper {
    const COLUMNS: &'static [&'static str] = &["N", "R", "R2", "CHISQ"];

    fn flags(&self) -> u16 {
        self.flags
    }

    fn write_text(&self, out: &mut Vec<u8>) {
        push_u64(out, self.n);
        out.push(b'\t');
        push_f64(out, self.r);
        out.push(b'\t');
        push_f64(out, self.r2);
        out.push(b'\t');
        push_f64(out, self.chisq);
    }

    fn write_binary(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.n.to_le_bytes());
        out.extend_from_slice(&self.r.to_le_bytes());
        out.extend_from_slice(&self.r2.to_le_bytes());
        out.extend_from_slice(&self.chisq.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Genotype;
    use approx::assert_relative_eq;

    /// Collapses expanded calls into runs.
    fn runs_of(calls: &[Genotype]) -> Vec<Run> {
        let mut runs: Vec<Run> = Vec::new();
        for &genotype in calls {
            match runs.last_mut() {
                Some(run) if run.genotype == genotype => run.length += 1,
                _ => runs.push(Run {
                    length: 1,
                    genotype,
                }),
            }
        }
        runs
    }

    fn calls(codes: &[u8]) -> Vec<Genotype> {
        codes.iter().map(|&code| Genotype::from_code(code)).collect()
    }

    /// Plain Pearson correlation of dosages, skipping missing calls.
    fn pearson(a: &[Genotype], b: &[Genotype]) -> f64 {
        let pairs: Vec<(f64, f64)> = a
            .iter()
            .zip(b)
            .filter_map(|(x, y)| Some((x.alt_dosage()? as f64, y.alt_dosage()? as f64)))
            .collect();
        let n = pairs.len() as f64;
        let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
        let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
        let cov: f64 = pairs.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
        let var_x: f64 = pairs.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
        let var_y: f64 = pairs.iter().map(|p| (p.1 - mean_y).powi(2)).sum();
        cov / (var_x * var_y).sqrt()
    }

    #[test]
    fn run_merge_matches_the_expanded_table() {
        let a = calls(&[0, 0, 0, 1, 1, 2, 2, 2, 3, 0]);
        let b = calls(&[0, 1, 1, 1, 1, 2, 0, 0, 2, 3]);
        let table = PairTable::from_runs(&runs_of(&a), &runs_of(&b));

        let mut expected = PairTable::default();
        for (x, y) in a.iter().zip(&b) {
            match (x.alt_dosage(), y.alt_dosage()) {
                (Some(x), Some(y)) => expected.counts[x as usize][y as usize] += 1,
                _ => expected.missing += 1,
            }
        }
        assert_eq!(table, expected);
        assert_eq!(table.called() + table.missing, 10);
    }

    #[test]
    fn correlation_matches_pearson() {
        let a = calls(&[0, 0, 1, 1, 2, 2, 0, 1, 2, 3]);
        let b = calls(&[0, 1, 1, 2, 2, 2, 0, 0, 1, 0]);
        let helper = LdHelper::compute(&runs_of(&a), &runs_of(&b), true, false);
        assert_relative_eq!(helper.r, pearson(&a, &b), epsilon = 1e-12);
        assert_relative_eq!(helper.r2, helper.r * helper.r);
        assert_relative_eq!(helper.chisq, 9.0 * helper.r2);
        assert_eq!(helper.n, 9);
        assert_eq!(helper.flags, FLAG_SAME_CONTIG | FLAG_HAS_MISSING);
    }

    #[test]
    fn identical_and_constant_variants() {
        let a = calls(&[0, 1, 2, 1, 0, 2]);
        let same = LdHelper::compute(&runs_of(&a), &runs_of(&a), true, true);
        assert_relative_eq!(same.r, 1.0);
        assert_relative_eq!(same.chisq, 6.0);

        let flat = calls(&[1; 6]);
        let none = LdHelper::compute(&runs_of(&a), &runs_of(&flat), false, false);
        assert_eq!(none.r, 0.0);
        assert_eq!(none.flags, 0);
    }

    #[test]
    fn text_columns_line_up() {
        let helper = LdHelper {
            n: 10,
            r: -0.5,
            r2: 0.25,
            chisq: 2.5,
            flags: 3,
        };
        let mut out = Vec::new();
        helper.write_text(&mut out);
        assert_eq!(String::from_utf8(out).unwrap(), "10\t-0.5\t0.25\t2.5");
        assert_eq!(LdHelper::COLUMNS.len(), 4);
    }
}
