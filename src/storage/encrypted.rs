//! SQLite-backed verdict store with AES-GCM encryption of the evidence
//! column. The evidence names which features fired and at what magnitudes,
//! which profiles the deployment's sensor placement, so it stays encrypted
//! at rest. Key derived from an operator-supplied secret.

use crate::decision::Verdict;
use crate::error::IdsError;
use crate::message::Label;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

fn derive_key(seed: &[u8]) -> [u8; KEY_LEN] {
    use ring::digest;
    let mut out = [0u8; KEY_LEN];
    let h = digest::digest(&digest::SHA256, seed);
    out[..h.as_ref().len().min(KEY_LEN)].copy_from_slice(h.as_ref());
    out
}

fn encrypt(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<String, IdsError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| IdsError::Storage("bad key length".into()))?;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt((&nonce).into(), plaintext)
        .map_err(|_| IdsError::Storage("encryption failed".into()))?;
    let mut out = nonce.to_vec();
    out.extend(ciphertext);
    Ok(BASE64.encode(&out))
}

fn decrypt(key: &[u8; KEY_LEN], encoded: &str) -> Result<Vec<u8>, IdsError> {
    let raw = BASE64
        .decode(encoded)
        .map_err(|e| IdsError::Storage(format!("evidence decode: {e}")))?;
    if raw.len() < NONCE_LEN {
        return Err(IdsError::Storage("evidence payload too short".into()));
    }
    let (nonce, ct) = raw.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| IdsError::Storage("bad key length".into()))?;
    cipher
        .decrypt(nonce.into(), ct)
        .map_err(|_| IdsError::Storage("evidence decryption failed".into()))
}

/// A verdict as read back from the store; evidence is decrypted on read.
#[derive(Debug)]
pub struct StoredVerdict {
    pub verdict_id: String,
    pub entity_id: String,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub label: Label,
    pub confidence: f32,
    pub evidence: Vec<(String, f32)>,
}

pub struct VerdictStore {
    conn: Mutex<Connection>,
    key: [u8; KEY_LEN],
}

impl VerdictStore {
    pub fn open(path: &Path, secret: &[u8]) -> Result<Self, IdsError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS verdicts (
                id TEXT PRIMARY KEY,
                entity_id TEXT NOT NULL,
                window_start INTEGER NOT NULL,
                window_end INTEGER NOT NULL,
                label TEXT NOT NULL,
                confidence REAL NOT NULL,
                evidence_enc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_verdicts_entity ON verdicts(entity_id);
            CREATE INDEX IF NOT EXISTS idx_verdicts_end ON verdicts(window_end);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            key: derive_key(secret),
        })
    }

    pub fn insert(&self, verdict: &Verdict) -> Result<(), IdsError> {
        let evidence_json = serde_json::to_string(&verdict.evidence)?;
        let enc = encrypt(&self.key, evidence_json.as_bytes())?;
        self.conn
            .lock()
            .map_err(|_| IdsError::Storage("store lock poisoned".into()))?
            .execute(
                "INSERT OR REPLACE INTO verdicts \
                 (id, entity_id, window_start, window_end, label, confidence, evidence_enc) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    verdict.verdict_id,
                    verdict.entity_id,
                    verdict.window_start_ms,
                    verdict.window_end_ms,
                    verdict.label.as_str(),
                    verdict.confidence,
                    enc
                ],
            )?;
        Ok(())
    }

    pub fn get(&self, verdict_id: &str) -> Result<Option<StoredVerdict>, IdsError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| IdsError::Storage("store lock poisoned".into()))?;
        let mut stmt = conn.prepare(
            "SELECT entity_id, window_start, window_end, label, confidence, evidence_enc \
             FROM verdicts WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![verdict_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let label_str: String = row.get(3)?;
        let label: Label = serde_json::from_value(serde_json::Value::String(label_str))?;
        let enc: String = row.get(5)?;
        let evidence: Vec<(String, f32)> = serde_json::from_slice(&decrypt(&self.key, &enc)?)?;
        Ok(Some(StoredVerdict {
            verdict_id: verdict_id.to_string(),
            entity_id: row.get(0)?,
            window_start_ms: row.get(1)?,
            window_end_ms: row.get(2)?,
            label,
            confidence: row.get(4)?,
            evidence,
        }))
    }

    /// Retention: drop verdicts whose window ended before `ts_ms`.
    pub fn prune_before(&self, ts_ms: i64) -> Result<u64, IdsError> {
        let n = self
            .conn
            .lock()
            .map_err(|_| IdsError::Storage("store lock poisoned".into()))?
            .execute("DELETE FROM verdicts WHERE window_end < ?1", params![ts_ms])?;
        Ok(n as u64)
    }
}
