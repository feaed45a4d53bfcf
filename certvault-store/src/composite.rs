//! Composite certificate store
//!
//! Groups child stores behind the single reader/writer contract. Children
//! are borrowed (shared handles), never closed, and may mix writable and
//! read-only capability. Reads return the first hit in registration order,
//! writes fan out to every writable child.

use crate::error::{Result, StoreError};
use crate::{CertReader, CertWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One registered child, remembering its capability.
enum Child {
    ReadOnly(Arc<dyn CertReader>),
    ReadWrite(Arc<dyn CertWriter>),
}

impl Child {
    fn get(&self, cert_id: &str) -> Result<String> {
        match self {
            Child::ReadOnly(c) => c.get(cert_id),
            Child::ReadWrite(c) => c.get(cert_id),
        }
    }

    fn export(&self, cert_id: &str, target_dir: &Path, copy_if_exists: bool) -> Result<PathBuf> {
        match self {
            Child::ReadOnly(c) => c.export(cert_id, target_dir, copy_if_exists),
            Child::ReadWrite(c) => c.export(cert_id, target_dir, copy_if_exists),
        }
    }

    fn exists(&self, cert_id: &str) -> bool {
        match self {
            Child::ReadOnly(c) => c.exists(cert_id),
            Child::ReadWrite(c) => c.exists(cert_id),
        }
    }
}

/// Composite manager over a group of certificate stores.
#[derive(Default)]
pub struct CompositeStore {
    /// All children in registration order, duplicate-free.
    children: Vec<Child>,
}

impl CompositeStore {
    pub fn new() -> Self {
        CompositeStore { children: Vec::new() }
    }

    /// Register a writable child. Ignored when already registered.
    pub fn register(&mut self, store: Arc<dyn CertWriter>) {
        if self.is_registered(&store) {
            return;
        }
        tracing::debug!("Registering writable child store");
        self.children.push(Child::ReadWrite(store));
    }

    /// Register a read-only child. Ignored when already registered.
    pub fn register_read_only(&mut self, store: Arc<dyn CertReader>) {
        if self.is_registered_read_only(&store) {
            return;
        }
        tracing::debug!("Registering read-only child store");
        self.children.push(Child::ReadOnly(store));
    }

    pub fn unregister(&mut self, store: &Arc<dyn CertWriter>) {
        self.children.retain(|child| match child {
            Child::ReadWrite(c) => !Arc::ptr_eq(c, store),
            Child::ReadOnly(_) => true,
        });
    }

    pub fn unregister_read_only(&mut self, store: &Arc<dyn CertReader>) {
        self.children.retain(|child| match child {
            Child::ReadOnly(c) => !Arc::ptr_eq(c, store),
            Child::ReadWrite(_) => true,
        });
    }

    pub fn is_registered(&self, store: &Arc<dyn CertWriter>) -> bool {
        self.children.iter().any(|child| match child {
            Child::ReadWrite(c) => Arc::ptr_eq(c, store),
            Child::ReadOnly(_) => false,
        })
    }

    pub fn is_registered_read_only(&self, store: &Arc<dyn CertReader>) -> bool {
        self.children.iter().any(|child| match child {
            Child::ReadOnly(c) => Arc::ptr_eq(c, store),
            Child::ReadWrite(_) => false,
        })
    }

    fn writers(&self) -> impl Iterator<Item = &Arc<dyn CertWriter>> {
        self.children.iter().filter_map(|child| match child {
            Child::ReadWrite(c) => Some(c),
            Child::ReadOnly(_) => None,
        })
    }
}

impl CertReader for CompositeStore {
    fn get(&self, cert_id: &str) -> Result<String> {
        for child in &self.children {
            match child.get(cert_id) {
                Ok(cert) => return Ok(cert),
                Err(StoreError::NotAvailable(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(StoreError::NotAvailable(cert_id.to_string()))
    }

    fn export(&self, cert_id: &str, target_dir: &Path, copy_if_exists: bool) -> Result<PathBuf> {
        for child in &self.children {
            match child.export(cert_id, target_dir, copy_if_exists) {
                Ok(path) => return Ok(path),
                Err(StoreError::NotAvailable(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(StoreError::NotAvailable(cert_id.to_string()))
    }

    fn exists(&self, cert_id: &str) -> bool {
        self.children.iter().any(|child| child.exists(cert_id))
    }
}

impl CertWriter for CompositeStore {
    fn insert(&self, cert_id: &str, cert: &str) -> Result<()> {
        for child in self.writers() {
            child.insert(cert_id, cert)?;
        }
        Ok(())
    }

    fn delete(&self, cert_id: &str) -> Result<()> {
        for child in self.writers() {
            child.delete(cert_id)?;
        }
        Ok(())
    }

    /// Commits every writable child; the returned counts are those of the
    /// last child, so callers must not treat them as a total across
    /// heterogeneous children.
    fn commit(&self) -> Result<(u64, u64)> {
        let mut counts = (0, 0);
        for child in self.writers() {
            counts = child.commit()?;
        }
        Ok(counts)
    }

    fn rollback(&self) -> Result<()> {
        for child in self.writers() {
            child.rollback()?;
        }
        Ok(())
    }
}
