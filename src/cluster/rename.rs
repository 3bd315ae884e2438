//! Key relocation across slots.
//!
//! When both keys hash to the same slot the store's own `RENAME`,
//! `RENAMENX` or `COPY` is used and is atomic. Otherwise the value is moved
//! with `DUMP`, `TTL`, `RESTORE` and finally `DEL` on the source. That
//! sequence is not atomic. A failure after `RESTORE` leaves the value under
//! both keys; it never loses it. The duplicate is reported, not undone.

use crate::cluster::resolver::ConnectionResolver;
use crate::cluster::router::CommandRouter;
use crate::cluster::slot::same_slot;
use crate::command;
use crate::error::{Result, RouterError};
use bytes::Bytes;
use tracing::{debug, warn};

/// What happens to the source and an existing destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationMode {
    /// Move, overwriting the destination
    Rename,
    /// Move only if the destination does not exist
    RenameIfAbsent,
    /// Duplicate, keeping the source
    Copy { replace: bool },
}

impl RelocationMode {
    fn overwrites(self) -> bool {
        matches!(
            self,
            RelocationMode::Rename | RelocationMode::Copy { replace: true }
        )
    }

    fn removes_source(self) -> bool {
        !matches!(self, RelocationMode::Copy { .. })
    }
}

pub struct KeyRelocator<R> {
    router: CommandRouter<R>,
    delete_attempts: u32,
}

impl<R: ConnectionResolver> KeyRelocator<R> {
    pub fn new(router: CommandRouter<R>, delete_attempts: u32) -> Self {
        Self {
            router,
            delete_attempts: delete_attempts.max(1),
        }
    }

    /// Move or copy `source` to `dest`.
    ///
    /// Returns `false` when nothing was written: the destination already
    /// existed in a non-overwriting mode, or the source was missing for a
    /// conditional rename or a copy. A missing source for a plain rename is
    /// [`RouterError::SourceNotFound`].
    pub async fn relocate(&self, source: &Bytes, dest: &Bytes, mode: RelocationMode) -> Result<bool> {
        if same_slot(source, dest) {
            return self.native(source, dest, mode).await;
        }
        debug!(
            "Relocating {:?} -> {:?} across slots ({:?})",
            source, dest, mode
        );

        // An existing destination ends a non-overwriting move before anything is read.
        if !mode.overwrites() {
            let exists = self
                .router
                .execute_for_key(dest, command::EXISTS, vec![dest.clone()])
                .await?;
            if exists > 0 {
                return Ok(false);
            }
        }

        let value = self
            .router
            .execute_for_key(source, command::DUMP, vec![source.clone()])
            .await?;
        let value = match value {
            Some(value) => value,
            None if mode == RelocationMode::Rename => {
                return Err(RouterError::SourceNotFound(lossy(source)));
            }
            None => return Ok(false),
        };

        let ttl = self
            .router
            .execute_for_key(source, command::TTL, vec![source.clone()])
            .await?;
        let ttl_ms = if ttl > 0 { ttl * 1000 } else { 0 };

        let mut args = vec![dest.clone(), Bytes::from(ttl_ms.to_string()), value];
        if mode.overwrites() {
            args.push(Bytes::from_static(b"REPLACE"));
        }
        self.router
            .execute_for_key(dest, command::RESTORE, args)
            .await?;

        if mode.removes_source() {
            self.delete_source(source, dest).await?;
        }
        Ok(true)
    }

    async fn native(&self, source: &Bytes, dest: &Bytes, mode: RelocationMode) -> Result<bool> {
        let args = vec![source.clone(), dest.clone()];
        match mode {
            RelocationMode::Rename => {
                self.router
                    .execute_for_key(source, command::RENAME, args)
                    .await?;
                Ok(true)
            }
            RelocationMode::RenameIfAbsent => {
                self.router
                    .execute_for_key(source, command::RENAMENX, args)
                    .await
            }
            RelocationMode::Copy { replace } => {
                let mut args = args;
                if replace {
                    args.push(Bytes::from_static(b"REPLACE"));
                }
                self.router.execute_for_key(source, command::COPY, args).await
            }
        }
    }

    async fn delete_source(&self, source: &Bytes, dest: &Bytes) -> Result<()> {
        let mut last_error = None;
        for attempt in 1..=self.delete_attempts {
            match self
                .router
                .execute_for_key(source, command::DEL, vec![source.clone()])
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => {
                    debug!("DEL {:?} failed (attempt {}): {}", source, attempt, e);
                    last_error = Some(e);
                }
            }
        }

        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        warn!(
            "Key {:?} restored to {:?} but the source could not be deleted, both now exist: {}",
            source, dest, reason
        );
        Err(RouterError::RelocationIncomplete {
            source_key: lossy(source),
            dest_key: lossy(dest),
            reason,
        })
    }
}

fn lossy(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}
