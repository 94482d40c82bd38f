//! Local shopping cart.
//!
//! Lines are keyed by product and normalised options: no two lines ever
//! share both. Every mutation is a single synchronous step; callers holding
//! the cart behind a lock must not await while holding it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use zalo_shop_core::Money;

use crate::models::{Product, SelectedOptions};

/// Identifier of a cart line, unique within one cart.
pub type LineId = u64;

/// Cart errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CartError {
    /// A fresh add needs a positive quantity.
    #[error("quantity must be positive")]
    InvalidQuantity,

    /// The referenced line does not exist.
    #[error("cart line {0} not found")]
    UnknownLine(LineId),
}

/// One cart entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: LineId,
    pub product: Product,
    pub options: SelectedOptions,
    pub quantity: u32,
}

impl CartLine {
    /// Unit price times quantity.
    #[must_use]
    pub fn subtotal(&self) -> Money {
        self.product.price.times(self.quantity)
    }

    fn matches(&self, product: &Product, options: &SelectedOptions) -> bool {
        self.product.id == product.id && self.options == *options
    }
}

/// The shopping cart, serialisable for local persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    lines: Vec<CartLine>,
    next_id: LineId,
    #[serde(default)]
    selected: BTreeSet<LineId>,
}

impl Cart {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a product or edit an existing line.
    ///
    /// - Editing with `quantity == 0` removes the edited line.
    /// - Editing into the product and options of another line folds that
    ///   line into the edited one (quantities summed, other line removed).
    /// - A fresh add bumps an identical line or appends a new one.
    ///
    /// Returns the id of the line that now holds the product, or `None` if
    /// the edited line was removed.
    ///
    /// # Errors
    ///
    /// Returns `CartError::UnknownLine` if `editing` names no line and
    /// `CartError::InvalidQuantity` for a fresh add of zero.
    pub fn add_or_update(
        &mut self,
        product: &Product,
        options: SelectedOptions,
        quantity: u32,
        editing: Option<LineId>,
    ) -> Result<Option<LineId>, CartError> {
        let options = options.normalized_for(product);

        match editing {
            Some(line_id) => self.edit(line_id, product, options, quantity),
            None => self.add(product, options, quantity).map(Some),
        }
    }

    fn add(
        &mut self,
        product: &Product,
        options: SelectedOptions,
        quantity: u32,
    ) -> Result<LineId, CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }

        if let Some(line) = self
            .lines
            .iter_mut()
            .find(|line| line.matches(product, &options))
        {
            line.quantity = line.quantity.saturating_add(quantity);
            return Ok(line.id);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.lines.push(CartLine {
            id,
            product: product.clone(),
            options,
            quantity,
        });
        Ok(id)
    }

    fn edit(
        &mut self,
        line_id: LineId,
        product: &Product,
        options: SelectedOptions,
        quantity: u32,
    ) -> Result<Option<LineId>, CartError> {
        if !self.lines.iter().any(|line| line.id == line_id) {
            return Err(CartError::UnknownLine(line_id));
        }

        if quantity == 0 {
            self.remove(line_id);
            return Ok(None);
        }

        let duplicate = self
            .lines
            .iter()
            .position(|line| line.id != line_id && line.matches(product, &options));

        let mut quantity = quantity;
        if let Some(index) = duplicate {
            let folded = self.lines.remove(index);
            quantity = quantity.saturating_add(folded.quantity);
            if self.selected.remove(&folded.id) {
                self.selected.insert(line_id);
            }
        }

        let line = self
            .lines
            .iter_mut()
            .find(|line| line.id == line_id)
            .ok_or(CartError::UnknownLine(line_id))?;
        line.product = product.clone();
        line.options = options;
        line.quantity = quantity;
        Ok(Some(line_id))
    }

    /// Remove a line. Returns it if it existed.
    pub fn remove(&mut self, line_id: LineId) -> Option<CartLine> {
        let index = self.lines.iter().position(|line| line.id == line_id)?;
        self.selected.remove(&line_id);
        Some(self.lines.remove(index))
    }

    /// Remove every line and the selection. Line ids are not reused.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.selected.clear();
    }

    /// Lines in insertion order.
    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    #[must_use]
    pub fn line(&self, line_id: LineId) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.id == line_id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Sum of quantities (the badge count).
    #[must_use]
    pub fn total_quantity(&self) -> u32 {
        self.lines
            .iter()
            .fold(0_u32, |sum, line| sum.saturating_add(line.quantity))
    }

    /// Sum of line subtotals.
    #[must_use]
    pub fn subtotal(&self) -> Money {
        self.lines.iter().map(CartLine::subtotal).sum()
    }

    /// Mark a line for checkout.
    ///
    /// # Errors
    ///
    /// Returns `CartError::UnknownLine` if the line does not exist.
    pub fn select(&mut self, line_id: LineId) -> Result<(), CartError> {
        if self.line(line_id).is_none() {
            return Err(CartError::UnknownLine(line_id));
        }
        self.selected.insert(line_id);
        Ok(())
    }

    /// Unmark a line.
    pub fn deselect(&mut self, line_id: LineId) {
        self.selected.remove(&line_id);
    }

    /// Mark every line.
    pub fn select_all(&mut self) {
        self.selected = self.lines.iter().map(|line| line.id).collect();
    }

    #[must_use]
    pub fn is_selected(&self, line_id: LineId) -> bool {
        self.selected.contains(&line_id)
    }

    /// Lines to submit: the selected ones, or every line when nothing is
    /// selected. Cart order is kept.
    #[must_use]
    pub fn checkout_lines(&self) -> Vec<CartLine> {
        self.lines
            .iter()
            .filter(|line| self.selected.is_empty() || self.selected.contains(&line.id))
            .cloned()
            .collect()
    }

    /// Take the quantities of submitted lines out of the cart.
    ///
    /// `submitted` is the snapshot handed to the order. Each line loses the
    /// submitted quantity and is removed only when nothing remains, so units
    /// merged into it while the order was in flight stay in the cart. A line
    /// whose product or options were edited since the snapshot is left
    /// alone.
    pub fn remove_submitted(&mut self, submitted: &[CartLine]) {
        for snapshot in submitted {
            let Some(line) = self.lines.iter_mut().find(|line| {
                line.id == snapshot.id && line.matches(&snapshot.product, &snapshot.options)
            }) else {
                continue;
            };

            line.quantity = line.quantity.saturating_sub(snapshot.quantity);
            if line.quantity == 0 {
                self.remove(snapshot.id);
            } else {
                self.selected.remove(&snapshot.id);
            }
        }

        if self.lines.is_empty() {
            self.clear();
        }
    }
}
