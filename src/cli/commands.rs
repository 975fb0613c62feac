use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use crate::config::ChannelConfig;
use crate::core::{AttachmentChannel, DecryptInput, DecryptOutput, ImportOutcome};
use crate::crypto::SecurePassphrase;
use crate::types::{ApiError, Request, Response};

#[derive(Parser)]
#[command(name = "attachment-channel")]
#[command(about = "End-to-end encrypted attachments between contacts")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Key directory (overrides ATTACHMENT_KEY_DIR)
    #[arg(long, global = true)]
    pub key_dir: Option<PathBuf>,

    /// Sign outgoing attachments with the local identity
    #[arg(long, global = true)]
    pub always_sign: Option<bool>,

    /// Decrypt timeout in milliseconds
    #[arg(long, global = true)]
    pub decrypt_timeout_ms: Option<u64>,

    /// Directory for decrypted output files
    #[arg(long, global = true)]
    pub scratch_dir: Option<PathBuf>,

    /// Ask for the key passphrase instead of reading ATTACHMENT_KEY_PASSPHRASE
    #[arg(long, global = true)]
    pub prompt_passphrase: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load or create the local identity and print its public key
    Keypair {
        /// User id bound to the identity
        user_id: String,
    },
    /// Encrypt a file for a registered contact
    Encrypt {
        /// Contact to encrypt for
        recipient: String,
        /// Plaintext file
        input: PathBuf,
        /// Where to write the armored ciphertext (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Local identity used for signing
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Decrypt an attachment addressed to the local identity
    Decrypt {
        /// Local identity to decrypt as
        #[arg(short, long)]
        user: String,
        /// Ciphertext file
        input: PathBuf,
        /// Where to write the plaintext (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Register a contact's armored public key
    ImportContact {
        contact_id: String,
        /// File holding the armored public key
        key_file: PathBuf,
    },
    /// Check whether a contact key is cached
    HasContact { contact_id: String },
    /// Answer JSON requests, one per stdin line
    Serve,
}

impl Cli {
    /// Environment config with command line overrides applied.
    pub fn channel_config(&self) -> Result<ChannelConfig> {
        let mut config = ChannelConfig::from_env()?;
        if let Some(key_dir) = &self.key_dir {
            config.key_dir = key_dir.clone();
        }
        if let Some(always_sign) = self.always_sign {
            config = config.with_always_sign(always_sign);
        }
        if let Some(millis) = self.decrypt_timeout_ms {
            if millis == 0 {
                return Err(anyhow!("--decrypt-timeout-ms must be greater than zero"));
            }
            config = config.with_decrypt_timeout(Duration::from_millis(millis));
        }
        if let Some(scratch_dir) = &self.scratch_dir {
            config = config.with_scratch_dir(scratch_dir);
        }
        if self.prompt_passphrase {
            config = config.with_passphrase(SecurePassphrase::from_user_input_with_prompt(
                "Key passphrase",
            )?);
        }
        Ok(config)
    }
}

pub struct CliApp {
    channel: AttachmentChannel,
}

impl CliApp {
    pub async fn open(config: ChannelConfig) -> Result<Self> {
        let channel = AttachmentChannel::open_default(config).await?;
        Ok(Self { channel })
    }

    pub async fn keypair(&self, user_id: &str) -> Result<()> {
        let public_key = self.channel.ensure_keypair(user_id).await?;
        info!("Identity {} ready in {}", user_id, self.channel.key_dir().display());
        print!("{}", public_key);
        Ok(())
    }

    pub async fn encrypt(
        &self,
        recipient: &str,
        input: &Path,
        output: Option<&Path>,
        user: Option<&str>,
    ) -> Result<()> {
        if let Some(user) = user {
            self.channel.ensure_keypair(user).await?;
        }

        let plaintext = tokio::fs::read(input)
            .await
            .with_context(|| format!("Failed to read {}", input.display()))?;
        let armored = self.channel.encrypt(&plaintext, recipient).await?;
        write_output(output, armored.as_bytes()).await
    }

    pub async fn decrypt(&self, user: &str, input: &Path, output: Option<&Path>) -> Result<()> {
        self.channel.ensure_keypair(user).await?;

        let ciphertext = tokio::fs::read(input)
            .await
            .with_context(|| format!("Failed to read {}", input.display()))?;
        let DecryptOutput::Data {
            plaintext,
            signed_by,
        } = self.channel.decrypt(DecryptInput::Data(ciphertext)).await?
        else {
            return Err(anyhow!("inline decrypt returned a file"));
        };

        match signed_by {
            Some(signer) => info!("Signature verified: {}", signer),
            None => info!("Attachment is not signed by a known key"),
        }
        write_output(output, &plaintext).await
    }

    pub async fn import_contact(&self, contact_id: &str, key_file: &Path) -> Result<()> {
        let armored = tokio::fs::read_to_string(key_file)
            .await
            .with_context(|| format!("Failed to read {}", key_file.display()))?;
        match self.channel.import_contact_key(contact_id, &armored).await? {
            ImportOutcome::Imported => println!("Imported contact key for {}", contact_id),
            ImportOutcome::AlreadyPresent => println!("Contact key for {} already present", contact_id),
        }
        Ok(())
    }

    pub async fn has_contact(&self, contact_id: &str) -> Result<bool> {
        let available = self.channel.is_contact_key_available(contact_id).await;
        println!("{}", available);
        Ok(available)
    }

    /// Read requests from stdin until EOF, answering each on its own line.
    pub async fn serve(&self) -> Result<()> {
        info!("Serving requests on stdin");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = self.answer(&line).await;
            let mut encoded = serde_json::to_string(&response)?;
            encoded.push('\n');
            stdout.write_all(encoded.as_bytes()).await?;
            stdout.flush().await?;
        }

        info!("Input closed, stopping");
        Ok(())
    }

    async fn answer(&self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.channel.handle(request).await,
            Err(e) => Response::error(ApiError::malformed(e.to_string())),
        }
    }
}

async fn write_output(output: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match output {
        Some(path) => {
            tokio::fs::write(path, bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(bytes).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

pub async fn run_cli(cli: Cli) -> Result<()> {
    let config = cli.channel_config()?;
    let app = CliApp::open(config).await?;

    match cli.command {
        Commands::Keypair { user_id } => {
            app.keypair(&user_id).await?;
        }

        Commands::Encrypt {
            recipient,
            input,
            output,
            user,
        } => {
            app.encrypt(&recipient, &input, output.as_deref(), user.as_deref())
                .await?;
        }

        Commands::Decrypt {
            user,
            input,
            output,
        } => {
            app.decrypt(&user, &input, output.as_deref()).await?;
        }

        Commands::ImportContact {
            contact_id,
            key_file,
        } => {
            app.import_contact(&contact_id, &key_file).await?;
        }

        Commands::HasContact { contact_id } => {
            app.has_contact(&contact_id).await?;
        }

        Commands::Serve => {
            app.serve().await?;
        }
    }

    Ok(())
}
