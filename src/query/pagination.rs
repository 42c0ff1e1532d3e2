use super::stage::Stage;
use crate::errors::DbError;
use crate::utils::num::u64_to_i64_saturating;
use serde::{Deserialize, Serialize};

/// Raw page size that callers holding plain integers use for "no limit".
pub const UNLIMITED_SENTINEL: i64 = -1;

/// Limit rendered for [`PageSize::Unlimited`].
pub const UNLIMITED_LIMIT: i64 = i64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSize {
    Unlimited,
    Limited(u64),
}

impl PageSize {
    /// Maps `-1` to `Unlimited` and positive values to `Limited`.
    ///
    /// # Errors
    /// Returns `DbError::InvalidPagination` for `0` and for negatives other than `-1`.
    pub fn from_raw(size: i64) -> Result<Self, DbError> {
        match size {
            UNLIMITED_SENTINEL => Ok(Self::Unlimited),
            n if n > 0 => Ok(Self::Limited(n.unsigned_abs())),
            n => Err(DbError::InvalidPagination(format!("page size must be positive or -1, got {n}"))),
        }
    }
}

/// Page size plus 1-based page number; page `0` means "first `size` rows, no skip".
///
/// Fields are private so every value, including deserialized ones, passes through [`Pagination::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PaginationParts")]
pub struct Pagination {
    size: PageSize,
    number: u64,
}

#[derive(Deserialize)]
struct PaginationParts {
    size: PageSize,
    #[serde(default)]
    number: u64,
}

impl TryFrom<PaginationParts> for Pagination {
    type Error = DbError;

    fn try_from(parts: PaginationParts) -> Result<Self, Self::Error> {
        Self::new(parts.size, parts.number)
    }
}

impl Pagination {
    /// # Errors
    /// Returns `DbError::InvalidPagination` if `size` is `Limited(0)`.
    pub fn new(size: PageSize, number: u64) -> Result<Self, DbError> {
        if size == PageSize::Limited(0) {
            return Err(DbError::InvalidPagination("page size must be positive".into()));
        }
        Ok(Self { size, number })
    }

    /// Builds from raw integers: size `-1` for unlimited, page `0` for no skip.
    ///
    /// # Errors
    /// Returns `DbError::InvalidPagination` for a bad size or a negative page number.
    pub fn from_raw(size: i64, number: i64) -> Result<Self, DbError> {
        let number = u64::try_from(number)
            .map_err(|_| DbError::InvalidPagination(format!("page number must not be negative, got {number}")))?;
        Self::new(PageSize::from_raw(size)?, number)
    }

    #[must_use]
    pub const fn unlimited() -> Self {
        Self { size: PageSize::Unlimited, number: 0 }
    }

    #[must_use]
    pub const fn size(&self) -> PageSize {
        self.size
    }

    #[must_use]
    pub const fn number(&self) -> u64 {
        self.number
    }

    /// `(skip, limit)` as they will appear on the wire; `skip` is `None` for a bare limit.
    ///
    /// Unlimited page 1 holds every row; later unlimited pages skip `i64::MAX` rows and come back empty.
    ///
    /// # Errors
    /// Returns `DbError::InvalidPagination` if `size * (number - 1)` overflows.
    pub fn window(&self) -> Result<(Option<i64>, i64), DbError> {
        match self.size {
            PageSize::Unlimited => {
                let skip = match self.number {
                    0 => None,
                    1 => Some(0),
                    _ => Some(i64::MAX),
                };
                Ok((skip, UNLIMITED_LIMIT))
            }
            PageSize::Limited(size) => {
                let limit = u64_to_i64_saturating(size);
                if self.number == 0 {
                    return Ok((None, limit));
                }
                let skip = size
                    .checked_mul(self.number - 1)
                    .and_then(|s| i64::try_from(s).ok())
                    .ok_or_else(|| {
                        DbError::InvalidPagination(format!("skip overflows for page {} of size {size}", self.number))
                    })?;
                Ok((Some(skip), limit))
            }
        }
    }

    /// Pagination stages in wire order: `$skip` (when paging) then `$limit`.
    ///
    /// # Errors
    /// See [`Pagination::window`].
    pub fn stages(&self) -> Result<Vec<Stage>, DbError> {
        let (skip, limit) = self.window()?;
        Ok(skip.map(Stage::Skip).into_iter().chain(std::iter::once(Stage::Limit(limit))).collect())
    }
}
