//! Order-preserving division of a trajectory into near-equal batches

use std::{fmt::Display, ops::Range};

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidPartitionRequest {
    pub total: usize,
    pub batches: usize,
}

impl Display for InvalidPartitionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cannot partition {} snapshots into {} batches",
            self.total, self.batches
        )
    }
}

impl std::error::Error for InvalidPartitionRequest {}

/// split the indices `0..total` into `batches` contiguous ranges. the size of
/// each range is counted by dealing the items out round-robin, so the first
/// `total % batches` ranges hold one extra item, but the ranges themselves are
/// laid end to end in order. when `batches > total` the trailing ranges are
/// empty
pub fn partition(
    total: usize,
    batches: usize,
) -> Result<Vec<Range<usize>>, InvalidPartitionRequest> {
    if batches == 0 {
        return Err(InvalidPartitionRequest { total, batches });
    }
    let mut sizes = vec![0; batches];
    for i in 0..total {
        sizes[i % batches] += 1;
    }
    let mut offset = 0;
    Ok(sizes
        .into_iter()
        .map(|size| {
            let range = offset..offset + size;
            offset += size;
            range
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(10, 3, &[0..4, 4..7, 7..10] ; "ten into three")]
    #[test_case(7, 2, &[0..4, 4..7] ; "seven into two")]
    #[test_case(6, 3, &[0..2, 2..4, 4..6] ; "even split")]
    #[test_case(2, 4, &[0..1, 1..2, 2..2, 2..2] ; "more batches than items")]
    #[test_case(0, 2, &[0..0, 0..0] ; "empty")]
    #[test_case(5, 1, &[0..5] ; "single batch")]
    fn examples(total: usize, batches: usize, want: &[Range<usize>]) {
        assert_eq!(partition(total, batches).unwrap(), want);
    }

    #[test]
    fn zero_batches() {
        assert_eq!(
            partition(10, 0),
            Err(InvalidPartitionRequest {
                total: 10,
                batches: 0
            })
        );
    }

    #[test]
    fn exact_cover() {
        for total in 0..50 {
            for batches in 1..15 {
                let got = partition(total, batches).unwrap();
                assert_eq!(got.len(), batches);
                let mut next = 0;
                for r in &got {
                    assert_eq!(r.start, next, "gap or overlap at {r:?}");
                    next = r.end;
                }
                assert_eq!(next, total);
                let sizes: Vec<_> = got.iter().map(|r| r.len()).collect();
                let max = sizes.iter().max().unwrap();
                let min = sizes.iter().min().unwrap();
                assert!(max - min <= 1, "{total} / {batches}: {sizes:?}");
                // the larger batches come first
                assert!(sizes.windows(2).all(|w| w[0] >= w[1]));
            }
        }
    }
}
