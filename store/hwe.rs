//! Hardy-Weinberg equilibrium exact test and allele-frequency summaries.

/// Genotype tallies for one variant, accumulated during the encoder's single pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenotypeCounts {
    pub hom_ref: u64,
    pub het: u64,
    pub hom_alt: u64,
    pub missing: u64,
}

impl GenotypeCounts {
    #[inline]
    pub fn called(&self) -> u64 {
        self.hom_ref + self.het + self.hom_alt
    }

    /// Minor-allele frequency over non-missing allele copies; 0 when nothing was called.
    pub fn minor_allele_frequency(&self) -> f64 {
        let copies = 2 * self.called();
        if copies == 0 {
            return 0.0;
        }
        let alt = (self.het + 2 * self.hom_alt) as f64 / copies as f64;
        alt.min(1.0 - alt)
    }

    pub fn hwe_p(&self) -> f64 {
        hwe_exact_p(self.het, self.hom_ref, self.hom_alt)
    }
}

/// Exact test of Hardy-Weinberg equilibrium (Wigginton, Cutler & Abecasis, 2005).
///
/// Returns the probability, under equilibrium, of observing a heterozygote count at least as
/// unlikely as `obs_hets` given the observed allele counts. Returns 1.0 for an empty sample.
pub fn hwe_exact_p(obs_hets: u64, obs_hom1: u64, obs_hom2: u64) -> f64 {
    let obs_homc = obs_hom1.max(obs_hom2);
    let obs_homr = obs_hom1.min(obs_hom2);
    let rare_copies = 2 * obs_homr + obs_hets;
    let genotypes = obs_hets + obs_homc + obs_homr;
    if genotypes == 0 {
        return 1.0;
    }

    let rare = rare_copies as usize;
    let mut het_probs = vec![0.0f64; rare + 1];

    // Start from the most likely heterozygote count; it must share parity with rare_copies.
    let mut mid = (rare_copies * (2 * genotypes - rare_copies) / (2 * genotypes)) as usize;
    if (rare & 1) != (mid & 1) {
        mid += 1;
    }

    het_probs[mid] = 1.0;
    let mut sum = 1.0;

    let mut curr_hets = mid;
    let mut curr_homr = (rare - mid) / 2;
    let mut curr_homc = genotypes as usize - curr_hets - curr_homr;
    while curr_hets > 1 {
        het_probs[curr_hets - 2] = het_probs[curr_hets] * (curr_hets * (curr_hets - 1)) as f64
            / (4.0 * (curr_homr + 1) as f64 * (curr_homc + 1) as f64);
        sum += het_probs[curr_hets - 2];
        curr_homr += 1;
        curr_homc += 1;
        curr_hets -= 2;
    }

    curr_hets = mid;
    curr_homr = (rare - mid) / 2;
    curr_homc = genotypes as usize - curr_hets - curr_homr;
    while curr_hets + 2 <= rare {
        het_probs[curr_hets + 2] = het_probs[curr_hets] * 4.0 * curr_homr as f64 * curr_homc as f64
            / ((curr_hets + 2) as f64 * (curr_hets + 1) as f64);
        sum += het_probs[curr_hets + 2];
        curr_homr -= 1;
        curr_homc -= 1;
        curr_hets += 2;
    }

    let observed = het_probs[obs_hets as usize] / sum;
    let p: f64 = het_probs
        .iter()
        .map(|prob| prob / sum)
        .filter(|prob| *prob <= observed)
        .sum();
    p.min(1.0)
}
