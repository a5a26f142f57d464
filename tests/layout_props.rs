use proptest::prelude::*;

use ral_kernels::backend::KernelMode;
use ral_kernels::context::{CpuContext, StreamHandle};
use ral_kernels::error::{ErrorKind, Operand};
use ral_kernels::kernels::ral_conv;
use ral_kernels::layout::{AxisRole, FormatTag, MetadataCursor, decode_layout};
use ral_kernels::tensors::{MemRef, MemRefMut};

fn decode(perm: &[i32], rank: usize, role: AxisRole) -> Option<FormatTag> {
    let sizes = vec![2; rank];
    let mut cursor = MetadataCursor::new(perm, Operand::Metadata);
    decode_layout(&mut cursor, &sizes, role, "conv", Operand::Input)
        .ok()
        .map(|layout| layout.tag)
}

fn permutations(rank: usize) -> Vec<Vec<i32>> {
    if rank == 0 {
        return vec![Vec::new()];
    }
    let mut all = Vec::new();
    for rest in permutations(rank - 1) {
        for slot in 0..rank {
            let mut perm = rest.clone();
            perm.insert(slot, (rank - 1) as i32);
            all.push(perm);
        }
    }
    all
}

#[test]
fn test_exhaustive_activation_permutations() {
    let mut recognized = Vec::new();
    for rank in [3, 4] {
        for perm in permutations(rank) {
            if let Some(tag) = decode(&perm, rank, AxisRole::Activation) {
                recognized.push((perm, tag));
            }
        }
    }
    recognized.sort_by_key(|(perm, _)| perm.clone());
    assert_eq!(
        recognized,
        vec![
            (vec![0, 1, 2], FormatTag::Abc),
            (vec![0, 1, 2, 3], FormatTag::Abcd),
            (vec![0, 2, 1], FormatTag::Acb),
            (vec![0, 3, 1, 2], FormatTag::Acdb),
            (vec![3, 2, 0, 1], FormatTag::Cdba),
        ]
    );
}

#[test]
fn test_exhaustive_filter_permutations() {
    let mut recognized: Vec<(Vec<i32>, FormatTag)> = permutations(4)
        .into_iter()
        .filter_map(|perm| decode(&perm, 4, AxisRole::Filter).map(|tag| (perm, tag)))
        .collect();
    recognized.sort_by_key(|(perm, _)| perm.clone());
    assert_eq!(
        recognized,
        vec![
            (vec![1, 0, 2, 3], FormatTag::Abcd),
            (vec![2, 3, 0, 1], FormatTag::Cdba),
            (vec![3, 0, 1, 2], FormatTag::Acdb),
        ]
    );
}

proptest! {
    #[test]
    fn decode_never_panics(
        perm in prop::collection::vec(any::<i32>(), 0..8),
        rank in 3usize..=4,
        filter in any::<bool>(),
    ) {
        let role = if filter { AxisRole::Filter } else { AxisRole::Activation };
        let sizes = vec![3; rank];
        let mut cursor = MetadataCursor::new(&perm, Operand::Metadata);
        match decode_layout(&mut cursor, &sizes, role, "conv", Operand::Input) {
            Ok(layout) => {
                prop_assert_eq!(layout.tag.rank(), rank);
                prop_assert_eq!(cursor.position(), rank);
            }
            Err(err) => prop_assert!(matches!(
                err.kind(),
                ErrorKind::InvalidLayout | ErrorKind::InvalidArgument
            )),
        }
    }

    #[test]
    fn conv_with_arbitrary_metadata_never_panics(
        metadata in prop::collection::vec(-2i32..6, 0..20),
        padding in prop::collection::vec(-1i32..3, 0..6),
    ) {
        let input = vec![1.0f32; 2 * 3 * 3];
        let filter = vec![1.0f32; 2 * 2 * 2];
        let mut output = vec![0.0f32; 2 * 2 * 2];
        let ctx = CpuContext::with_mode(KernelMode::OneDnn);
        {
            let input = MemRef::contiguous(&input, [1, 2, 3, 3]).unwrap();
            let filter = MemRef::contiguous(&filter, [2, 1, 2, 2]).unwrap();
            let padding = MemRef::contiguous(&padding, [padding.len()]).unwrap();
            let metadata = MemRef::contiguous(&metadata, [metadata.len()]).unwrap();
            let mut out = MemRefMut::contiguous(&mut output, [1, 2, 2, 2]).unwrap();
            ral_conv(&ctx, StreamHandle::null(), &input, &filter, &padding, &mut out, &metadata);
        }
        prop_assert!(ctx.errors().len() <= 1);
        if ctx.has_failed() {
            prop_assert!(output.iter().all(|&v| v == 0.0));
        }
    }
}
