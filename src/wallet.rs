//! Wallet management module
//!
//! [`WalletApi::unlock`] checks credentials against the key store and hands
//! back an [`UnlockedSession`]. The session is an ordinary value: pass it to
//! whatever needs to sign, drop it or call [`UnlockedSession::lock`] to
//! forget the key. There is no process-wide active account.

use crate::client::{LedgerClient, QueryOperation};
use crate::crypto::{
    verify_message, EncryptedPrivateKey, KdfParams, KeyPair, Signature, SignedTransaction,
    SignerService,
};
use crate::errors::ClientResult;
use crate::keystore::{Authentication, Identity, KeyStore};
use crate::tx::{ContractDefinition, ContractInvocation, RawTransaction, TxBuilder};
use crate::types::{AccountAddress, ContractAddress, Fee, IntoAmount, Recipient, TxHash};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Key management and unlocking over one key store
#[derive(Clone)]
pub struct WalletApi {
    keystore: Arc<dyn KeyStore>,
}

impl WalletApi {
    pub fn new(keystore: Arc<dyn KeyStore>) -> Self {
        Self { keystore }
    }

    pub fn keystore(&self) -> &Arc<dyn KeyStore> {
        &self.keystore
    }

    /// Generate a key and store it under `auth`
    pub async fn create_key(&self, auth: &Authentication) -> ClientResult<AccountAddress> {
        let key = KeyPair::generate();
        self.keystore.save(auth, &key).await?;
        info!(identity = %auth.identity(), address = %key.address(), "Key created");
        Ok(key.address().clone())
    }

    /// Store an existing key under `auth`
    pub async fn import_key(&self, auth: &Authentication, key: &KeyPair) -> ClientResult<()> {
        self.keystore.save(auth, key).await?;
        Ok(())
    }

    pub async fn list_identities(&self) -> ClientResult<Vec<Identity>> {
        Ok(self.keystore.list_identities().await?)
    }

    /// Decrypt the key for `auth`; a wrong password fails here
    pub async fn unlock(&self, auth: &Authentication) -> ClientResult<UnlockedSession> {
        let key = self.keystore.load(auth).await?;
        info!(identity = %auth.identity(), address = %key.address(), "Account unlocked");
        Ok(UnlockedSession {
            identity: auth.identity().clone(),
            key: Arc::new(key),
        })
    }
}

/// Signing capability for one unlocked account
///
/// Clones share the key. Key material is zeroized when the last clone drops.
#[derive(Clone)]
pub struct UnlockedSession {
    identity: Identity,
    key: Arc<KeyPair>,
}

impl UnlockedSession {
    /// Account the session signs for
    pub fn principal(&self) -> &AccountAddress {
        self.key.address()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn signer(&self) -> &dyn SignerService {
        &*self.key
    }

    pub async fn sign(&self, raw: RawTransaction) -> ClientResult<SignedTransaction> {
        self.key.sign_transaction(raw).await
    }

    pub async fn sign_message(&self, message: &[u8]) -> ClientResult<Signature> {
        self.key.sign_message(message).await
    }

    pub fn verify_message(&self, message: &[u8], signature: &Signature) -> ClientResult<bool> {
        verify_message(self.principal(), message, signature)
    }

    /// Re-encrypt the unlocked key under `password` for export
    pub fn export(&self, password: &str, kdf: KdfParams) -> ClientResult<EncryptedPrivateKey> {
        Ok(self.key.encrypt(password, kdf)?)
    }

    /// End the session
    pub fn lock(self) {
        info!(identity = %self.identity, "Account locked");
    }

    /// Operations on `client` signed by this session
    pub fn with<'a>(&'a self, client: &'a LedgerClient) -> SessionClient<'a> {
        SessionClient { session: self, client }
    }
}

impl fmt::Debug for UnlockedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockedSession")
            .field("identity", &self.identity)
            .field("principal", self.principal())
            .finish()
    }
}

/// An unlocked session paired with a client
#[derive(Clone, Copy)]
pub struct SessionClient<'a> {
    session: &'a UnlockedSession,
    client: &'a LedgerClient,
}

impl<'a> SessionClient<'a> {
    pub fn transaction(&self) -> TransactionApi<'a> {
        TransactionApi { inner: *self }
    }

    pub fn contract(&self) -> ContractApi<'a> {
        ContractApi { inner: *self }
    }

    /// Read-only lookups; these need no signing
    pub fn query(&self) -> QueryOperation<'a> {
        self.client.query()
    }

    /// Bind the principal from chain state if needed, then invoke with retries
    async fn invoke<F>(&self, operation: &'static str, prepare: F) -> ClientResult<TxHash>
    where
        F: Fn() -> TxBuilder + Send + Sync,
    {
        self.client.invoker().ensure_bound(self.session.principal()).await?;
        self.client
            .invoke_with(operation, self.session.signer(), prepare)
            .await
    }
}

/// Transfers, governance and raw commits for the session's account
pub struct TransactionApi<'a> {
    inner: SessionClient<'a>,
}

impl<'a> TransactionApi<'a> {
    pub async fn send(
        &self,
        to: impl Into<Recipient>,
        amount: impl IntoAmount,
        fee: Fee,
    ) -> ClientResult<TxHash> {
        let to = to.into();
        let amount = amount.into_amount()?;
        self.inner
            .invoke("send", || RawTransaction::transfer().to(to.clone()).amount(amount).fee(fee))
            .await
    }

    pub async fn send_with_payload(
        &self,
        to: impl Into<Recipient>,
        amount: impl IntoAmount,
        payload: impl Into<bytes::Bytes>,
        fee: Fee,
    ) -> ClientResult<TxHash> {
        let to = to.into();
        let amount = amount.into_amount()?;
        let payload = payload.into();
        self.inner
            .invoke("send", || {
                RawTransaction::transfer()
                    .to(to.clone())
                    .amount(amount)
                    .payload(payload.clone())
                    .fee(fee)
            })
            .await
    }

    pub async fn create_name(&self, name: &str, fee: Fee) -> ClientResult<TxHash> {
        self.inner
            .invoke("create_name", || RawTransaction::create_name().name(name).fee(fee))
            .await
    }

    pub async fn update_name(
        &self,
        name: &str,
        next_owner: &AccountAddress,
        fee: Fee,
    ) -> ClientResult<TxHash> {
        self.inner
            .invoke("update_name", || {
                RawTransaction::update_name()
                    .name(name)
                    .next_owner(next_owner.clone())
                    .fee(fee)
            })
            .await
    }

    pub async fn stake(&self, amount: impl IntoAmount, fee: Fee) -> ClientResult<TxHash> {
        let amount = amount.into_amount()?;
        self.inner
            .invoke("stake", || RawTransaction::stake().amount(amount).fee(fee))
            .await
    }

    pub async fn unstake(&self, amount: impl IntoAmount, fee: Fee) -> ClientResult<TxHash> {
        let amount = amount.into_amount()?;
        self.inner
            .invoke("unstake", || RawTransaction::unstake().amount(amount).fee(fee))
            .await
    }

    pub async fn vote(
        &self,
        vote_id: &str,
        candidates: &[String],
        fee: Fee,
    ) -> ClientResult<TxHash> {
        self.inner
            .invoke("vote", || {
                RawTransaction::vote()
                    .vote_id(vote_id)
                    .candidates(candidates.iter().cloned())
                    .fee(fee)
            })
            .await
    }

    /// Sign `raw` with the session and submit it once
    pub async fn commit(&self, raw: RawTransaction) -> ClientResult<TxHash> {
        self.inner
            .client
            .transaction()
            .commit_raw(self.inner.session.signer(), raw)
            .await
    }

    /// Submit a transaction signed elsewhere, once
    pub async fn commit_signed(&self, signed: &SignedTransaction) -> ClientResult<TxHash> {
        self.inner.client.transaction().commit(signed).await
    }
}

/// Contract operations for the session's account
pub struct ContractApi<'a> {
    inner: SessionClient<'a>,
}

impl<'a> ContractApi<'a> {
    pub async fn deploy(&self, definition: ContractDefinition, fee: Fee) -> ClientResult<TxHash> {
        self.inner
            .invoke("deploy", || RawTransaction::deploy().definition(definition.clone()).fee(fee))
            .await
    }

    pub async fn redeploy(
        &self,
        contract: &ContractAddress,
        definition: ContractDefinition,
        fee: Fee,
    ) -> ClientResult<TxHash> {
        self.inner
            .invoke("redeploy", || {
                RawTransaction::redeploy()
                    .contract(contract.clone())
                    .definition(definition.clone())
                    .fee(fee)
            })
            .await
    }

    pub async fn execute(&self, invocation: ContractInvocation, fee: Fee) -> ClientResult<TxHash> {
        self.inner
            .invoke("execute", || RawTransaction::invoke().invocation(invocation.clone()).fee(fee))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ClientError, KeyStoreError};
    use crate::invoker::RetryPolicy;
    use crate::keystore::{InMemoryKeyStore, KeyAlias};
    use crate::nonce::NonceProvider;
    use crate::test_utils::SimulatedLedger;
    use crate::tx::TxKind;
    use crate::types::{Aer, Name, SystemAccount};
    use std::time::Duration;

    async fn setup() -> (Arc<SimulatedLedger>, LedgerClient, UnlockedSession) {
        let ledger = Arc::new(SimulatedLedger::new());
        let client = LedgerClient::with_parts(
            ledger.clone(),
            Arc::new(NonceProvider::new()),
            RetryPolicy::new(3, Duration::from_millis(1)),
            16,
        )
        .unwrap();
        let wallet = WalletApi::new(Arc::new(InMemoryKeyStore::with_kdf(KdfParams::LIGHT)));
        let auth = Authentication::of(KeyAlias::new("main").unwrap(), "password");
        let address = wallet.create_key(&auth).await.unwrap();
        ledger.fund(&address, Aer::new(1_000));
        let session = wallet.unlock(&auth).await.unwrap();
        (ledger, client, session)
    }

    #[tokio::test]
    async fn test_unlock_with_wrong_password_fails() {
        let wallet = WalletApi::new(Arc::new(InMemoryKeyStore::with_kdf(KdfParams::LIGHT)));
        let auth = Authentication::of(KeyAlias::new("main").unwrap(), "password");
        wallet.create_key(&auth).await.unwrap();

        let wrong = Authentication::of(KeyAlias::new("main").unwrap(), "nope");
        let err = wallet.unlock(&wrong).await.unwrap_err();
        assert!(matches!(err, ClientError::KeyStore(KeyStoreError::WrongPassword(_))));
    }

    #[tokio::test]
    async fn test_first_use_binds_from_chain_state() {
        let (ledger, client, session) = setup().await;
        ledger.set_nonce(session.principal(), 41);

        let receiver = AccountAddress::from_public_key([3u8; 32]);
        session.with(&client).transaction().send(receiver.clone(), 10, Fee::ZERO).await.unwrap();
        session.with(&client).transaction().send(receiver.clone(), 10, Fee::ZERO).await.unwrap();

        let nonces: Vec<u64> = ledger.accepted().iter().map(|t| t.raw().nonce()).collect();
        assert_eq!(nonces, vec![42, 43]);
        assert_eq!(ledger.account(&receiver).balance, Aer::new(20));
    }

    #[tokio::test]
    async fn test_governance_operations() {
        let (ledger, client, session) = setup().await;
        let api = session.with(&client).transaction();
        let next_owner = AccountAddress::from_public_key([5u8; 32]);

        api.create_name("mynamemyname", Fee::ZERO).await.unwrap();
        ledger.seal_block();
        api.update_name("mynamemyname", &next_owner, Fee::ZERO).await.unwrap();
        api.stake(100, Fee::ZERO).await.unwrap();
        api.unstake(50, Fee::ZERO).await.unwrap();
        api.vote("voteBP", &["candidate".to_string()], Fee::ZERO).await.unwrap();
        ledger.seal_block();

        let accepted = ledger.accepted();
        let kinds: Vec<TxKind> = accepted.iter().map(|t| t.raw().kind()).collect();
        assert_eq!(
            kinds,
            vec![
                TxKind::CreateName,
                TxKind::UpdateName,
                TxKind::Stake,
                TxKind::Unstake,
                TxKind::Vote
            ]
        );
        assert_eq!(accepted[0].raw().to(), Some(Recipient::System(SystemAccount::Name)));
        assert_eq!(accepted[2].raw().to(), Some(Recipient::System(SystemAccount::System)));

        let query = session.with(&client).query();
        let name: Name = "mynamemyname".parse().unwrap();
        assert_eq!(query.name_owner(&name, None).await.unwrap(), Some(next_owner));
        let original = query.name_owner(&name, Some(1)).await.unwrap();
        assert_eq!(original.as_ref(), Some(session.principal()));

        let stake = query.stake_info(session.principal()).await.unwrap();
        assert_eq!(stake.amount, Aer::new(50));
        let votes = query.votes_of(session.principal()).await.unwrap();
        assert_eq!(votes.votes[0].vote_id, "voteBP");
        assert_eq!(votes.votes[0].candidates, vec!["candidate".to_string()]);
        let elected = query.list_elected("voteBP", 10).await.unwrap();
        assert_eq!(elected[0].candidate, "candidate");
        assert_eq!(elected[0].amount, Aer::new(50));
    }

    #[tokio::test]
    async fn test_invalid_name_never_reaches_endpoint() {
        let (ledger, client, session) = setup().await;
        let err = session
            .with(&client)
            .transaction()
            .create_name("short", Fee::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("name"));
        assert_eq!(ledger.submit_calls(), 0);
    }

    #[tokio::test]
    async fn test_send_to_name_recipient() {
        let (ledger, client, session) = setup().await;
        let api = session.with(&client).transaction();
        let name: Name = "mynamemyname".parse().unwrap();

        let err = api.send(name.clone(), 1, Fee::ZERO).await.unwrap_err();
        assert!(matches!(err, ClientError::Remote(_)));

        let owner = AccountAddress::from_public_key([5u8; 32]);
        api.create_name(name.as_str(), Fee::ZERO).await.unwrap();
        api.update_name(name.as_str(), &owner, Fee::ZERO).await.unwrap();
        api.send(name.clone(), 7, Fee::ZERO).await.unwrap();

        let accepted = ledger.accepted();
        assert_eq!(accepted[2].raw().to(), Some(Recipient::Name(name)));
        assert_eq!(ledger.account(&owner).balance, Aer::new(7));
    }

    #[tokio::test]
    async fn test_contract_deploy_and_execute() {
        let (ledger, client, session) = setup().await;
        let definition = ContractDefinition::builder()
            .code(vec![1u8, 2, 3, 4])
            .constructor_arg("init")
            .build()
            .unwrap();
        let deployed = session
            .with(&client)
            .contract()
            .deploy(definition, Fee::ZERO)
            .await
            .unwrap();
        let receipt = session.with(&client).query().receipt(&deployed).await.unwrap().unwrap();
        let contract = receipt.contract_address.unwrap();

        let invocation = ContractInvocation::builder(contract.clone())
            .function("set")
            .arg("key")
            .arg(333)
            .arg("test2")
            .build()
            .unwrap();
        session.with(&client).contract().execute(invocation, Fee::ZERO).await.unwrap();
        assert_eq!(ledger.accepted().len(), 2);

        let get = ContractInvocation::builder(contract).function("get").arg("key").build().unwrap();
        let result = session.with(&client).query().contract(&get).await.unwrap();
        assert_eq!(result.bind::<serde_json::Value>().unwrap(), serde_json::json!([333, "test2"]));
    }

    #[tokio::test]
    async fn test_sign_message_round_trip() {
        let (_ledger, _client, session) = setup().await;
        let signature = session.sign_message(b"hello").await.unwrap();
        assert!(session.verify_message(b"hello", &signature).unwrap());
        assert!(!session.verify_message(b"hellp", &signature).unwrap());
        session.lock();
    }
}
