use core::fmt;

use serde::{Deserialize, Serialize};

use gestio_core::{DomainError, DomainResult, OperationType, SequenceKey, TenantId};

use crate::movement::Sign;
use crate::normalize_code;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Order,
    DeliveryNote,
    Invoice,
    CreditNote,
}

impl DocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Order => "order",
            DocumentType::DeliveryNote => "delivery_note",
            DocumentType::Invoice => "invoice",
            DocumentType::CreditNote => "credit_note",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "order" => Ok(DocumentType::Order),
            "delivery_note" => Ok(DocumentType::DeliveryNote),
            "invoice" => Ok(DocumentType::Invoice),
            "credit_note" => Ok(DocumentType::CreditNote),
            other => Err(DomainError::field("document_type", format!("unknown document type '{other}'"))),
        }
    }

    pub fn is_fiscal(self) -> bool {
        matches!(self, DocumentType::Invoice | DocumentType::CreditNote)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Group of document causali that may each be derived at most once from the
/// same order (`invoice.sale`, `delivery_note.sale`...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CausaleFamily(String);

impl CausaleFamily {
    pub fn of(document_type: DocumentType, operation: OperationType) -> Self {
        Self(format!("{}.{}", document_type.as_str(), operation.as_str()))
    }

    /// Guard family recorded when an order's stock movements are posted.
    pub fn fulfillment(operation: OperationType) -> Self {
        Self(format!("fulfillment.{}", operation.as_str()))
    }

    pub fn from_raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CausaleFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reason code of an order, delivery note or invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentCausale {
    pub tenant_id: TenantId,
    pub code: String,
    pub description: String,
    pub document_type: DocumentType,
    pub operation: OperationType,
    pub sign: Sign,
    pub generates_movement: bool,
    pub generates_accounting_entry: bool,
    pub separate_numbering: bool,
    /// Movement causale posted when the document moves stock.
    pub movement_causale: Option<String>,
    pub active: bool,
}

impl DocumentCausale {
    pub fn new(
        tenant_id: TenantId,
        code: &str,
        description: impl Into<String>,
        document_type: DocumentType,
        operation: OperationType,
    ) -> DomainResult<Self> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(DomainError::field("description", "must not be empty"));
        }
        Ok(Self {
            tenant_id,
            code: normalize_code(code)?,
            description,
            document_type,
            operation,
            sign: if document_type == DocumentType::CreditNote {
                Sign::Negative
            } else {
                Sign::Positive
            },
            generates_movement: false,
            generates_accounting_entry: document_type.is_fiscal(),
            separate_numbering: false,
            movement_causale: None,
            active: true,
        })
    }

    pub fn moving_stock_with(mut self, movement_code: &str) -> DomainResult<Self> {
        self.generates_movement = true;
        self.movement_causale = Some(normalize_code(movement_code)?);
        Ok(self)
    }

    pub fn with_separate_numbering(mut self) -> Self {
        self.separate_numbering = true;
        self
    }

    pub fn is_fiscal_document(&self) -> bool {
        self.document_type.is_fiscal()
    }

    pub fn family(&self) -> CausaleFamily {
        CausaleFamily::of(self.document_type, self.operation)
    }

    /// Sequence this causale's documents are numbered in.
    pub fn sequence_key(&self) -> DomainResult<SequenceKey> {
        if self.separate_numbering {
            SequenceKey::new(self.code.clone())
        } else {
            SequenceKey::new(format!("{}.{}", self.document_type.as_str(), self.operation.as_str()))
        }
    }

    /// Code of the movement causale this document posts with.
    pub fn linked_movement(&self) -> DomainResult<&str> {
        match (&self.movement_causale, self.generates_movement) {
            (Some(code), true) => Ok(code.as_str()),
            _ => Err(DomainError::field(
                "causale",
                format!("document causale '{}' does not generate stock movements", self.code),
            )),
        }
    }

    pub fn ensure_kind(&self, document_type: DocumentType) -> DomainResult<()> {
        if self.document_type == document_type {
            Ok(())
        } else {
            Err(DomainError::field(
                "causale",
                format!(
                    "document causale '{}' is a {} causale, expected {}",
                    self.code, self.document_type, document_type
                ),
            ))
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        normalize_code(&self.code)?;
        if self.generates_movement && self.movement_causale.is_none() {
            return Err(DomainError::field(
                "movement_causale",
                "required when the causale generates stock movements",
            ));
        }
        if self.document_type == DocumentType::CreditNote && self.sign == Sign::Positive {
            return Err(DomainError::field("sign", "credit notes carry a negative sign"));
        }
        Ok(())
    }
}
