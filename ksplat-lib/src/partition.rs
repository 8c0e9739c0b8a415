use crate::record::SplatRecord;

/// How an encoder splits its input into independently streamable sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SectionPartition {
    /// Every record in one section.
    #[default]
    Single,
    /// Even input indices, then odd input indices.
    Parity,
    /// Consecutive runs of at most `n` records.
    Chunks(usize),
}

impl SectionPartition {
    /// Splits `records` into ordered sections, dropping sections left empty.
    pub fn split(self, records: Vec<SplatRecord>) -> Vec<Vec<SplatRecord>> {
        let sections = match self {
            SectionPartition::Single => vec![records],
            SectionPartition::Parity => {
                let (even, odd): (Vec<_>, Vec<_>) = records
                    .into_iter()
                    .enumerate()
                    .partition(|(i, _)| i % 2 == 0);
                vec![
                    even.into_iter().map(|(_, r)| r).collect(),
                    odd.into_iter().map(|(_, r)| r).collect(),
                ]
            }
            SectionPartition::Chunks(n) => {
                let n = n.max(1);
                let mut sections: Vec<Vec<SplatRecord>> = Vec::with_capacity(records.len().div_ceil(n));
                let mut iter = records.into_iter().peekable();
                while iter.peek().is_some() {
                    sections.push(iter.by_ref().take(n).collect());
                }
                sections
            }
        };
        sections.into_iter().filter(|s: &Vec<_>| !s.is_empty()).collect()
    }
}

impl std::str::FromStr for SectionPartition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(SectionPartition::Single),
            "parity" => Ok(SectionPartition::Parity),
            other => other
                .strip_prefix("chunks:")
                .and_then(|n| n.parse().ok())
                .filter(|&n: &usize| n > 0)
                .map(SectionPartition::Chunks)
                .ok_or_else(|| format!("unknown partition '{}' (single, parity, chunks:N)", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn records(n: usize) -> Vec<SplatRecord> {
        (0..n)
            .map(|i| SplatRecord {
                position: Vec3::splat(i as f32),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_parity_split() {
        let sections = SectionPartition::Parity.split(records(5));
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].len(), 3);
        assert_eq!(sections[1].len(), 2);
        assert_eq!(sections[1][0].position.x, 1.0);
    }

    #[test]
    fn test_chunk_split() {
        let sections = SectionPartition::Chunks(4).split(records(10));
        let lens: Vec<_> = sections.iter().map(Vec::len).collect();
        assert_eq!(lens, vec![4, 4, 2]);
        assert_eq!(sections[2][1].position.x, 9.0);
    }

    #[test]
    fn test_empty_sections_dropped() {
        assert!(SectionPartition::Single.split(Vec::new()).is_empty());
        assert_eq!(SectionPartition::Parity.split(records(1)).len(), 1);
    }

    #[test]
    fn test_parse() {
        assert_eq!("parity".parse::<SectionPartition>().unwrap(), SectionPartition::Parity);
        assert_eq!(
            "chunks:100".parse::<SectionPartition>().unwrap(),
            SectionPartition::Chunks(100)
        );
        assert!("chunks:0".parse::<SectionPartition>().is_err());
    }
}
