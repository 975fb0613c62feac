//! PGP message sealing (encrypt + sign) and trial unsealing using rPGP 0.16

use crate::crypto::pgp::keypair::{PgpKey, PgpKeyManager, SecurePassphrase};
use anyhow::{anyhow, Result};
use pgp::composed::{ArmorOptions, Message, MessageBuilder};
use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use rand::thread_rng;

const ARMORED_MESSAGE_HEADER: &[u8] = b"-----BEGIN PGP MESSAGE-----";

/// rPGP 0.16 cannot read back a one-pass signed message whose literal data is
/// empty, so an empty attachment carries this one-byte body under a reserved
/// literal file name instead.
const EMPTY_ATTACHMENT_NAME: &str = "attachment-channel/empty";
const EMPTY_ATTACHMENT_BODY: &[u8] = &[0];

/// Plaintext recovered by [`PgpSealer::unseal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsealed {
    pub plaintext: Vec<u8>,
    /// Index into the keyring of the key that opened the message.
    pub recipient_index: usize,
    /// Index into the keyring of the key whose signature verified, if any.
    pub signer_index: Option<usize>,
}

/// PGP message operations using rPGP 0.16.
pub struct PgpSealer;

impl PgpSealer {
    /// Encrypt `plaintext` to the recipient's encryption subkey, optionally
    /// signing it with the signer's signing subkey.
    ///
    /// Returns an armored `PGP MESSAGE`.
    pub fn seal(
        plaintext: &[u8],
        recipient: &PgpKey,
        signer: Option<&PgpKey>,
        passphrase: &SecurePassphrase,
    ) -> Result<String> {
        tracing::debug!("Sealing {} bytes of attachment data", plaintext.len());

        let mut rng = thread_rng();
        let encryption_key = PgpKeyManager::encryption_subkey(recipient.public_key())?;

        let (file_name, body) = if plaintext.is_empty() {
            (EMPTY_ATTACHMENT_NAME, EMPTY_ATTACHMENT_BODY.to_vec())
        } else {
            ("", plaintext.to_vec())
        };

        let mut builder = MessageBuilder::from_bytes(file_name, body)
            .seipd_v1(&mut rng, SymmetricKeyAlgorithm::AES256);
        builder
            .encrypt_to_key(&mut rng, &encryption_key.key)
            .map_err(|e| anyhow!("Failed to encrypt to recipient key: {}", e))?;

        if let Some(signer) = signer {
            let secret_key = signer
                .secret_key()
                .ok_or_else(|| anyhow!("Signing requires a secret key"))?;
            let signing_key = PgpKeyManager::signing_subkey(secret_key)?;
            builder.sign(
                &signing_key.key,
                passphrase.to_pgp_password(),
                HashAlgorithm::Sha256,
            );
        }

        let armored = builder
            .to_armored_string(&mut rng, ArmorOptions::default())
            .map_err(|e| anyhow!("Failed to armor message: {}", e))?;

        tracing::debug!("Sealed attachment, signed={}", signer.is_some());
        Ok(armored)
    }

    /// Try every secret key in `keyring` until one opens the message.
    ///
    /// Public-only members cannot decrypt, but they take part in signature
    /// verification once the message is open.
    pub fn unseal(
        ciphertext: &[u8],
        keyring: &[PgpKey],
        passphrase: &SecurePassphrase,
    ) -> Result<Unsealed> {
        // Fail on malformed input before walking the keyring.
        parse_message(ciphertext)?;

        let password = passphrase.to_pgp_password();
        let mut last_error = None;

        for (index, candidate) in keyring.iter().enumerate() {
            let Some(secret_key) = candidate.secret_key() else {
                continue;
            };

            let message = parse_message(ciphertext)?;
            let mut decrypted = match message.decrypt(&password, secret_key) {
                Ok(decrypted) => decrypted,
                Err(e) => {
                    tracing::trace!("Keyring member {} did not match: {}", index, e);
                    last_error = Some(e.to_string());
                    continue;
                }
            };

            if decrypted.is_compressed() {
                decrypted = decrypted
                    .decompress()
                    .map_err(|e| anyhow!("Failed to decompress message: {}", e))?;
            }

            let empty_placeholder = decrypted.literal_data_header().is_some_and(|header| {
                header.file_name().as_ref() == EMPTY_ATTACHMENT_NAME.as_bytes()
            });

            // Reading to the end also checks the integrity protection.
            let mut plaintext = decrypted
                .as_data_vec()
                .map_err(|e| anyhow!("Message integrity check failed: {}", e))?;

            if empty_placeholder {
                if plaintext != EMPTY_ATTACHMENT_BODY {
                    return Err(anyhow!("Malformed empty attachment"));
                }
                plaintext.clear();
            }

            let signer_index = if decrypted.is_signed() {
                keyring
                    .iter()
                    .position(|member| verifies(&mut decrypted, member))
            } else {
                None
            };

            return Ok(Unsealed {
                plaintext,
                recipient_index: index,
                signer_index,
            });
        }

        Err(match last_error {
            Some(e) => anyhow!("No keyring member could decrypt the message: {}", e),
            None => anyhow!("Keyring holds no secret key able to decrypt"),
        })
    }
}

fn parse_message(ciphertext: &[u8]) -> Result<Message<'_>> {
    if ciphertext.trim_ascii_start().starts_with(ARMORED_MESSAGE_HEADER) {
        let (message, _headers) = Message::from_armor(ciphertext)
            .map_err(|e| anyhow!("Failed to parse armored message: {}", e))?;
        Ok(message)
    } else {
        Message::from_bytes(ciphertext).map_err(|e| anyhow!("Failed to parse message: {}", e))
    }
}

fn verifies(message: &mut Message<'_>, member: &PgpKey) -> bool {
    let public_key = member.public_key();
    if message.verify_read(&public_key.primary_key).is_ok() {
        return true;
    }
    public_key
        .public_subkeys
        .iter()
        .any(|subkey| message.verify_read(&subkey.key).is_ok())
}
