//! Drives a page-numbered fetch operation to completion.

use std::future::Future;

use crate::{Error, Result};

/// Invokes `fetch_page` for pages 1, 2, 3, … accumulating the records. Stops
/// after a page that yields zero records (end of data) or fewer than
/// `page_size` records (last partial page); that page's records are included.
///
/// A transport error terminates the walk as well; the partial accumulation is
/// returned together with the error so the caller can decide whether the data
/// gathered so far is still worth materializing.
pub async fn walk<T, F, Fut>(mut fetch_page: F, page_size: usize) -> (Vec<T>, Option<Error>)
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut records = Vec::new();
    let mut page = 1;
    loop {
        match fetch_page(page).await {
            Ok(batch) => {
                let fetched = batch.len();
                records.extend(batch);
                if fetched < page_size {
                    return (records, None);
                }
            }
            Err(err) => return (records, Some(err)),
        }
        page += 1;
    }
}
