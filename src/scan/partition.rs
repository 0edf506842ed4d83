use crate::traits::ScanError;

/// Splits `packages` into consecutive, order-preserving batches of
/// `batch_size`; only the last batch may be shorter.
///
/// An empty input yields no batches at all.
pub fn split_into_batches<T: Clone>(
    packages: &[T],
    batch_size: usize,
) -> Result<Vec<Vec<T>>, ScanError> {
    if batch_size == 0 {
        return Err(ScanError::InvalidArgument(
            "batch size must be at least 1".to_string(),
        ));
    }

    Ok(packages
        .chunks(batch_size)
        .map(|chunk| chunk.to_vec())
        .collect())
}
