//! Splits one cursor into consecutive bounded sub-cursors.
//!
//! Each batch borrows the outer cursor, so only one batch can be alive at a
//! time and the borrow checker enforces that the previous batch is finished
//! before the next one is requested. Rows a consumer leaves unread are skipped
//! when the next batch is requested, so batch `i` always starts at row
//! `i * batch_size` of the source no matter how much of earlier batches was
//! read.

use log::debug;

use crate::{
    cursor::RowCursor,
    decorators::{Counting, Limit, WarmStart},
    error::{CursorError, Result},
};

/// One batch: at most `batch_size` rows, already positioned on its first row
/// for the purposes of the first `advance()`.
pub type Batch<'b, C> = Limit<WarmStart<&'b mut Counting<C>>>;

pub struct Batches<C> {
    outer: Counting<C>,
    batch_size: u64,
    emitted: u64,
    finished: bool,
}

impl<C> Batches<C>
where
    C: RowCursor,
{
    pub fn new(inner: C, batch_size: u64) -> Result<Self> {
        if batch_size == 0 {
            return Err(CursorError::InvalidArgument(
                "Batch size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            outer: Counting::new(inner),
            batch_size,
            emitted: 0,
            finished: false,
        })
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    pub fn batches_emitted(&self) -> u64 {
        self.emitted
    }

    /// Rows the source has produced so far, read or skipped.
    pub fn rows_consumed(&self) -> u64 {
        self.outer.rows()
    }

    /// Returns the next batch, or `None` once the source is exhausted.
    pub fn next_batch(&mut self) -> Result<Option<Batch<'_, C>>> {
        if self.finished {
            return Ok(None);
        }
        let boundary = self.emitted * self.batch_size;
        let mut skipped = 0u64;
        while self.outer.rows() < boundary {
            if !self.outer.advance()? {
                debug!("Source ended while skipping {skipped} unread row(s)");
                self.finished = true;
                return Ok(None);
            }
            skipped += 1;
        }
        if skipped > 0 {
            debug!(
                "Skipped {skipped} unread row(s) after batch {}",
                self.emitted
            );
        }
        if !self.outer.advance()? {
            self.finished = true;
            return Ok(None);
        }
        self.emitted += 1;
        Ok(Some(Limit::new(
            WarmStart::already_advanced(&mut self.outer, true),
            self.batch_size,
        )))
    }

    /// Hands every batch to `consume` in order. Returns the number of batches.
    pub fn for_each_batch<F>(&mut self, mut consume: F) -> Result<u64>
    where
        F: for<'b> FnMut(u64, &mut Batch<'b, C>) -> Result<()>,
    {
        let mut count = 0;
        while let Some(mut batch) = self.next_batch()? {
            consume(count, &mut batch)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn close(&mut self) -> Result<()> {
        self.finished = true;
        self.outer.close()
    }
}
