//! CPU Topology Codec
//!
//! Pure conversions between CPU-id sets and the two textual encodings the
//! Linux kernel uses for them:
//!
//! - **Range lists** (`0-2,5,7-9`), as found in `/sys/devices/system/cpu/isolated`
//!   and the `isolcpus=` boot parameter.
//! - **Bitmasks** (`00000001,00000001`), as found in `/proc/irq/*/smp_affinity`:
//!   comma-separated 32-bit hex words, most-significant word first.
//!
//! Masks are held as an explicit sequence of `u32` words so CPU counts beyond
//! 64 need no big-integer support.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Sentinel reported by sysfs CPU lists when the feature is not in use
/// (e.g. `/sys/devices/system/cpu/nohz_full` prints ` (null)`).
pub const ABSENT_LIST_SENTINEL: &str = "(null)";

/// Bits per mask word
const WORD_BITS: usize = 32;

/// Highest CPU id accepted in a range list
pub const MAX_CPU_ID: usize = 1 << 20;

/// Errors produced while decoding CPU lists or masks
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    /// A list token is not a non-negative integer
    #[error("invalid CPU identifier {token:?} in CPU list")]
    InvalidCpu {
        /// Offending token
        token: String,
    },

    /// A range whose first CPU exceeds its last
    #[error("invalid CPU range {first}-{last}: first CPU is greater than last")]
    ReversedRange {
        /// First CPU of the range
        first: usize,
        /// Last CPU of the range
        last: usize,
    },

    /// A CPU id above [`MAX_CPU_ID`]
    #[error("CPU {cpu} exceeds the maximum CPU id {max}")]
    CpuTooLarge {
        /// Offending CPU id
        cpu: usize,
        /// Highest accepted CPU id
        max: usize,
    },

    /// A mask word is not 1 to 8 hex digits
    #[error("invalid CPU mask word {token:?} (expected up to 8 hex digits)")]
    InvalidMaskWord {
        /// Offending token
        token: String,
    },
}

/// Ordered, duplicate-free set of logical CPU identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CpuSet {
    cpus: BTreeSet<usize>,
}

impl CpuSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a CPU, returning `false` if it was already present
    pub fn insert(&mut self, cpu: usize) -> bool {
        self.cpus.insert(cpu)
    }

    /// Whether `cpu` is in the set
    pub fn contains(&self, cpu: usize) -> bool {
        self.cpus.contains(&cpu)
    }

    /// Number of CPUs in the set
    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    /// Whether the set holds no CPU
    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    /// Lowest CPU identifier in the set
    pub fn first(&self) -> Option<usize> {
        self.cpus.first().copied()
    }

    /// Highest CPU identifier in the set
    pub fn last(&self) -> Option<usize> {
        self.cpus.last().copied()
    }

    /// Iterate CPU identifiers in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.cpus.iter().copied()
    }

    /// Ascending CPU identifiers as a vector
    pub fn to_vec(&self) -> Vec<usize> {
        self.iter().collect()
    }
}

impl FromIterator<usize> for CpuSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self {
            cpus: iter.into_iter().collect(),
        }
    }
}

impl<const N: usize> From<[usize; N]> for CpuSet {
    fn from(cpus: [usize; N]) -> Self {
        cpus.into_iter().collect()
    }
}

impl Extend<usize> for CpuSet {
    fn extend<I: IntoIterator<Item = usize>>(&mut self, iter: I) {
        self.cpus.extend(iter);
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_cpu_list(self))
    }
}

/// Format a CPU set as a range list, collapsing maximal consecutive runs.
///
/// ```
/// use isobench_cpu::{CpuSet, format_cpu_list};
///
/// let cpus = CpuSet::from([0, 1, 2, 5, 7, 8, 9]);
/// assert_eq!(format_cpu_list(&cpus), "0-2,5,7-9");
/// ```
pub fn format_cpu_list(cpus: &CpuSet) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut run: Option<(usize, usize)> = None;

    for cpu in cpus.iter() {
        run = match run {
            Some((first, last)) if cpu == last + 1 => Some((first, cpu)),
            Some((first, last)) => {
                parts.push(format_run(first, last));
                Some((cpu, cpu))
            }
            None => Some((cpu, cpu)),
        };
    }
    if let Some((first, last)) = run {
        parts.push(format_run(first, last));
    }

    parts.join(",")
}

fn format_run(first: usize, last: usize) -> String {
    if first == last {
        first.to_string()
    } else {
        format!("{first}-{last}")
    }
}

/// Parse a range list such as `0-2,5,7-9`.
///
/// Returns `Ok(None)` for the empty string and for the `(null)` sentinel:
/// both mean "no list", which is not the same thing as an empty set.
/// Surrounding spaces, NUL bytes and newlines are ignored.
pub fn parse_cpu_list(text: &str) -> Result<Option<CpuSet>, TopologyError> {
    let text = text.trim_matches(|c: char| c == ' ' || c == '\0' || c == '\n' || c == '\r');
    if text.is_empty() || text == ABSENT_LIST_SENTINEL {
        return Ok(None);
    }

    let mut cpus = CpuSet::new();
    for token in text.split(',') {
        let token = token.trim();
        match token.split_once('-') {
            Some((first, last)) => {
                let first = parse_cpu_id(first)?;
                let last = parse_cpu_id(last)?;
                if first > last {
                    return Err(TopologyError::ReversedRange { first, last });
                }
                cpus.extend(first..=last);
            }
            None => {
                cpus.insert(parse_cpu_id(token)?);
            }
        }
    }

    Ok(Some(cpus))
}

fn parse_cpu_id(token: &str) -> Result<usize, TopologyError> {
    let cpu = token
        .trim()
        .parse::<usize>()
        .map_err(|_| TopologyError::InvalidCpu {
            token: token.to_string(),
        })?;
    if cpu > MAX_CPU_ID {
        return Err(TopologyError::CpuTooLarge {
            cpu,
            max: MAX_CPU_ID,
        });
    }
    Ok(cpu)
}

/// Arbitrary-width CPU bitmask stored as 32-bit words, least significant first.
///
/// High zero words are never stored, so two masks with the same set bits
/// compare equal regardless of how many leading zero words their text had.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CpuMask {
    words: Vec<u32>,
}

impl CpuMask {
    /// Build a mask from words given least significant first
    pub fn from_words(words: Vec<u32>) -> Self {
        let mut mask = Self { words };
        mask.normalize();
        mask
    }

    /// Build a mask with one bit set per CPU
    pub fn from_cpus(cpus: &CpuSet) -> Self {
        let mut mask = Self::default();
        for cpu in cpus.iter() {
            mask.set(cpu);
        }
        mask
    }

    /// Set bit `cpu`, growing the word sequence as needed
    pub fn set(&mut self, cpu: usize) {
        let word = cpu / WORD_BITS;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (cpu % WORD_BITS);
    }

    /// Whether bit `cpu` is set
    pub fn is_set(&self, cpu: usize) -> bool {
        self.words
            .get(cpu / WORD_BITS)
            .is_some_and(|word| word & (1 << (cpu % WORD_BITS)) != 0)
    }

    /// Words, least significant first
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Whether no bit is set
    pub fn is_zero(&self) -> bool {
        self.words.is_empty()
    }

    /// The set of CPUs whose bit is set
    pub fn to_cpus(&self) -> CpuSet {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(index, &word)| {
                (0..WORD_BITS)
                    .filter(move |bit| word & (1 << bit) != 0)
                    .map(move |bit| index * WORD_BITS + bit)
            })
            .collect()
    }

    fn normalize(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

impl fmt::Display for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_cpu_mask(self))
    }
}

/// Format a mask as comma-separated 8-digit lowercase hex words,
/// most significant first. A zero mask renders as a single zero word.
pub fn format_cpu_mask(mask: &CpuMask) -> String {
    if mask.words.is_empty() {
        return "00000000".to_string();
    }
    mask.words
        .iter()
        .rev()
        .map(|word| format!("{word:08x}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Format a CPU set directly as a bitmask string.
///
/// ```
/// use isobench_cpu::{CpuSet, format_cpus_as_mask};
///
/// assert_eq!(format_cpus_as_mask(&CpuSet::from([0, 32])), "00000001,00000001");
/// ```
pub fn format_cpus_as_mask(cpus: &CpuSet) -> String {
    format_cpu_mask(&CpuMask::from_cpus(cpus))
}

/// Parse a bitmask string, most significant word first.
///
/// Each comma-separated token is one 32-bit group; the running value is
/// shifted left one word per token and the group OR-ed in.
pub fn parse_cpu_mask(text: &str) -> Result<CpuMask, TopologyError> {
    let mut words = Vec::new();
    for token in text.trim().split(',') {
        let token = token.trim();
        let word = u32::from_str_radix(token, 16).map_err(|_| TopologyError::InvalidMaskWord {
            token: token.to_string(),
        })?;
        words.push(word);
    }
    words.reverse();
    Ok(CpuMask::from_words(words))
}

/// Group CPUs that share the same description and render one
/// `<cpu-list>=<info>` entry per group, ordered by CPU list.
///
/// Useful for compact reporting of per-CPU facts such as frequency governors.
pub fn format_cpu_infos<I, S>(infos: I) -> Vec<String>
where
    I: IntoIterator<Item = (usize, S)>,
    S: Into<String>,
{
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (cpu, info) in infos {
        groups.entry(info.into()).or_default().push(cpu);
    }

    let mut items: Vec<(Vec<usize>, String)> = groups
        .into_iter()
        .map(|(info, mut cpus)| {
            cpus.sort_unstable();
            cpus.dedup();
            (cpus, info)
        })
        .collect();
    items.sort();

    items
        .into_iter()
        .map(|(cpus, info)| {
            let cpus: CpuSet = cpus.into_iter().collect();
            format!("{}={}", format_cpu_list(&cpus), info)
        })
        .collect()
}

/// Number of logical CPUs configured online, or `None` if it cannot be determined.
pub fn logical_cpu_count() -> Option<usize> {
    #[cfg(unix)]
    {
        let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if count >= 1 {
            return Some(count as usize);
        }
    }
    std::thread::available_parallelism()
        .ok()
        .map(|count| count.get())
}


/// Property-based tests using proptest
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn cpu_set_strategy() -> impl Strategy<Value = CpuSet> {
        prop::collection::btree_set(0usize..512, 0..64).prop_map(|cpus| cpus.into_iter().collect())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// A formatted list always parses back to the same set
        #[test]
        fn prop_cpu_list_round_trip(cpus in cpu_set_strategy()) {
            prop_assume!(!cpus.is_empty());
            let text = format_cpu_list(&cpus);
            prop_assert_eq!(parse_cpu_list(&text).unwrap(), Some(cpus));
        }

        /// Bit i of the decoded mask is set iff i was in the set
        #[test]
        fn prop_cpu_mask_round_trip(cpus in cpu_set_strategy()) {
            let text = format_cpus_as_mask(&cpus);
            let mask = parse_cpu_mask(&text).unwrap();
            for cpu in 0..600 {
                prop_assert_eq!(mask.is_set(cpu), cpus.contains(cpu));
            }
        }

        /// Every mask word is rendered as exactly 8 lowercase hex digits
        #[test]
        fn prop_mask_words_are_fixed_width(cpus in cpu_set_strategy()) {
            let text = format_cpus_as_mask(&cpus);
            for word in text.split(',') {
                prop_assert_eq!(word.len(), 8);
                prop_assert!(word.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
            }
        }
    }
}
