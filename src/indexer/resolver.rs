//! Idempotent get-or-create for graph nodes.
//!
//! An id already in the change set or the store is returned untouched; no
//! accessor is called again for it. An absent id is built from independent
//! accessor reads, each falling back to its zero value on revert, and staged
//! as new. The store inserts new entities only if still absent, so each id is
//! written at most once.

use super::{ChangeSet, IndexError};
use crate::chain::{Accessor, ChainError, ContractReader, ReadValue};
use crate::db::EntityStore;
use crate::domain::amount::checked_decimals;
use crate::domain::{
    contract_node, Address, Approval, BlockTime, ComplianceModule, Entity, EntityId, EntityKind,
    Settlement, Token, TokenAmount, TokenBalance, TokenRegistry, U256,
};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub id: EntityId,
    /// False when the entity already existed.
    pub created: bool,
}

pub struct EntityResolver {
    store: Arc<dyn EntityStore>,
    reader: Arc<dyn ContractReader>,
}

impl EntityResolver {
    pub fn new(store: Arc<dyn EntityStore>, reader: Arc<dyn ContractReader>) -> Self {
        EntityResolver { store, reader }
    }

    /// Stage `id` from the store if it is not staged yet. Returns whether it exists.
    pub async fn load(&self, cs: &mut ChangeSet, id: &EntityId) -> Result<bool, IndexError> {
        if cs.get(id).is_some() {
            return Ok(true);
        }
        match self.store.get_entity(id).await? {
            Some(entity) => {
                cs.insert_loaded(entity);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Get or create the entity `id` of `kind`.
    pub async fn resolve(
        &self,
        cs: &mut ChangeSet,
        id: &EntityId,
        kind: EntityKind,
    ) -> Result<Resolved, IndexError> {
        if self.load(cs, id).await? {
            expect_kind(cs, id, kind)?;
            return Ok(Resolved {
                id: id.clone(),
                created: false,
            });
        }

        let at = cs.timestamp();
        let entity = match kind {
            EntityKind::Token => self.build_token(single_address(id, kind)?, at).await?,
            EntityKind::TokenBalance => {
                let (token, account) = address_pair(id, kind)?;
                let decimals = self.token_decimals(cs, token).await?;
                Entity::TokenBalance(TokenBalance {
                    id: id.clone(),
                    token: EntityId::from_address(token),
                    account: EntityId::from_address(account),
                    value: TokenAmount::zero(decimals)?,
                    updated_at: at,
                })
            }
            EntityKind::Settlement => self.build_settlement(single_address(id, kind)?, at).await?,
            EntityKind::Approval => {
                let (settlement, account) = address_pair(id, kind)?;
                Entity::Approval(Approval {
                    id: id.clone(),
                    settlement: EntityId::from_address(settlement),
                    account: EntityId::from_address(account),
                    approved: false,
                    timestamp: None,
                })
            }
            EntityKind::TokenRegistry => Entity::TokenRegistry(TokenRegistry {
                id: EntityId::from_address(single_address(id, kind)?),
                type_name: String::new(),
                deployment_registry: None,
                created_at: at,
            }),
            EntityKind::ComplianceModule => Entity::ComplianceModule(ComplianceModule {
                id: EntityId::from_address(single_address(id, kind)?),
                name: String::new(),
                deployment_registry: None,
                created_at: at,
            }),
            // Flows only come into existence together with their settlement.
            EntityKind::Flow => return Err(unresolvable(id, kind)),
            other => contract_node(other, single_address(id, other)?, at)
                .ok_or_else(|| unresolvable(id, other))?,
        };

        debug!(entity = %id, kind = %kind, "entity created");
        cs.insert_new(entity);
        Ok(Resolved {
            id: id.clone(),
            created: true,
        })
    }

    pub async fn resolve_account(
        &self,
        cs: &mut ChangeSet,
        address: Address,
    ) -> Result<Resolved, IndexError> {
        self.resolve(cs, &EntityId::from_address(address), EntityKind::Account)
            .await
    }

    /// Get or create a token; `token_type` labels a token created here and is
    /// ignored for an existing one.
    pub async fn resolve_token(
        &self,
        cs: &mut ChangeSet,
        address: Address,
        token_type: &str,
    ) -> Result<Resolved, IndexError> {
        let resolved = self
            .resolve(cs, &EntityId::from_address(address), EntityKind::Token)
            .await?;
        if resolved.created {
            if let Some(Entity::Token(token)) = cs.get_mut(&resolved.id) {
                token.token_type = token_type.to_string();
            }
        }
        Ok(resolved)
    }

    pub async fn resolve_balance(
        &self,
        cs: &mut ChangeSet,
        token: Address,
        account: Address,
    ) -> Result<Resolved, IndexError> {
        self.resolve(cs, &EntityId::pair(token, account), EntityKind::TokenBalance)
            .await
    }

    pub async fn resolve_settlement(
        &self,
        cs: &mut ChangeSet,
        address: Address,
    ) -> Result<Resolved, IndexError> {
        self.resolve(cs, &EntityId::from_address(address), EntityKind::Settlement)
            .await
    }

    pub async fn resolve_approval(
        &self,
        cs: &mut ChangeSet,
        settlement: Address,
        account: Address,
    ) -> Result<Resolved, IndexError> {
        self.resolve(cs, &EntityId::pair(settlement, account), EntityKind::Approval)
            .await
    }

    /// Decimals of `token`, creating the token if needed.
    pub async fn token_decimals(
        &self,
        cs: &mut ChangeSet,
        token: Address,
    ) -> Result<u8, IndexError> {
        let id = EntityId::from_address(token);
        if !self.load(cs, &id).await? {
            let entity = self.build_token(token, cs.timestamp()).await?;
            cs.insert_new(entity);
        }
        match cs.get(&id) {
            Some(Entity::Token(t)) => Ok(t.decimals),
            Some(other) => Err(IndexError::KindMismatch {
                id,
                expected: EntityKind::Token,
                found: other.kind(),
            }),
            None => Err(unresolvable(&id, EntityKind::Token)),
        }
    }

    /// Raw accessor read; `None` on revert.
    pub async fn read(
        &self,
        contract: Address,
        accessor: Accessor,
    ) -> Result<Option<ReadValue>, ChainError> {
        Ok(self.reader.call(contract, accessor).await?.ok())
    }

    async fn read_string(&self, contract: Address, accessor: Accessor) -> Result<String, ChainError> {
        Ok(match self.read(contract, accessor).await? {
            Some(ReadValue::String(s)) => s,
            _ => String::new(),
        })
    }

    async fn read_uint(&self, contract: Address, accessor: Accessor) -> Result<U256, ChainError> {
        Ok(match self.read(contract, accessor).await? {
            Some(ReadValue::Uint(v)) => v,
            _ => U256::ZERO,
        })
    }

    async fn read_bool(&self, contract: Address, accessor: Accessor) -> Result<bool, ChainError> {
        Ok(matches!(
            self.read(contract, accessor).await?,
            Some(ReadValue::Bool(true))
        ))
    }

    async fn read_address(
        &self,
        contract: Address,
        accessor: Accessor,
    ) -> Result<Address, ChainError> {
        Ok(match self.read(contract, accessor).await? {
            Some(ReadValue::Address(a)) => a,
            _ => Address::ZERO,
        })
    }

    async fn build_token(&self, address: Address, at: BlockTime) -> Result<Entity, IndexError> {
        let (name, symbol, raw_decimals, face_value, denomination) = futures::try_join!(
            self.read_string(address, Accessor::Name),
            self.read_string(address, Accessor::Symbol),
            self.read_uint(address, Accessor::Decimals),
            self.read_uint(address, Accessor::FaceValue),
            self.read_address(address, Accessor::DenominationAsset),
        )?;
        let decimals = checked_decimals(raw_decimals)?;

        Ok(Entity::Token(Token {
            id: EntityId::from_address(address),
            name,
            symbol,
            decimals,
            token_type: String::new(),
            // Accessor reads see the chain head, so supply is rebuilt from replayed mints and burns.
            total_supply: TokenAmount::zero(decimals)?,
            face_value,
            denomination_asset: (!denomination.is_zero()).then(|| EntityId::from_address(denomination)),
            collateral: U256::ZERO,
            registry: None,
            holders_count: 0,
            created_at: at,
        }))
    }

    async fn build_settlement(&self, address: Address, at: BlockTime) -> Result<Entity, IndexError> {
        let (cutoff, auto_execute) = futures::try_join!(
            self.read_uint(address, Accessor::CutoffDate),
            self.read_bool(address, Accessor::AutoExecute),
        )?;

        Ok(Entity::Settlement(Settlement {
            id: EntityId::from_address(address),
            cutoff_date: BlockTime::new(saturating_secs(cutoff)),
            auto_execute,
            executed: false,
            cancelled: false,
            factory: None,
            flows: Vec::new(),
            participants: Vec::new(),
            created_at: at,
        }))
    }
}

fn saturating_secs(value: U256) -> i64 {
    if value > U256::from(i64::MAX as u64) {
        i64::MAX
    } else {
        value.as_limbs()[0] as i64
    }
}

fn expect_kind(cs: &ChangeSet, id: &EntityId, expected: EntityKind) -> Result<(), IndexError> {
    match cs.get(id) {
        Some(entity) if entity.kind() == expected => Ok(()),
        Some(entity) => Err(IndexError::KindMismatch {
            id: id.clone(),
            expected,
            found: entity.kind(),
        }),
        None => Err(unresolvable(id, expected)),
    }
}

fn unresolvable(id: &EntityId, kind: EntityKind) -> IndexError {
    IndexError::Unresolvable {
        id: id.clone(),
        kind,
    }
}

fn single_address(id: &EntityId, kind: EntityKind) -> Result<Address, IndexError> {
    match id.as_bytes().len() {
        20 => id.address().ok_or_else(|| unresolvable(id, kind)),
        _ => Err(unresolvable(id, kind)),
    }
}

fn address_pair(id: &EntityId, kind: EntityKind) -> Result<(Address, Address), IndexError> {
    match (id.address(), id.second_address()) {
        (Some(first), Some(second)) => Ok((first, second)),
        _ => Err(unresolvable(id, kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockContractReader;
    use crate::db::{init_db, Repository};
    use crate::domain::{EventKey, B256};
    use tempfile::TempDir;

    const TOKEN: Address = Address::repeat_byte(0x11);
    const HOLDER: Address = Address::repeat_byte(0x22);

    async fn setup(reader: MockContractReader) -> (EntityResolver, Arc<Repository>, Arc<MockContractReader>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let repo = Arc::new(Repository::new(pool));
        let reader = Arc::new(reader);
        let resolver = EntityResolver::new(repo.clone(), reader.clone());
        (resolver, repo, reader, temp_dir)
    }

    fn change_set(tx: u8) -> ChangeSet {
        ChangeSet::new(
            EventKey {
                tx_hash: B256::repeat_byte(tx),
                log_index: 0,
            },
            BlockTime::new(1_000),
        )
    }

    #[tokio::test]
    async fn test_reverted_fields_default_to_zero() {
        // Only decimals answers; everything else reverts.
        let reader = MockContractReader::new().with_value(
            TOKEN,
            Accessor::Decimals,
            ReadValue::Uint(U256::from(6u8)),
        );
        let (resolver, _repo, _reader, _temp) = setup(reader).await;
        let mut cs = change_set(1);

        let resolved = resolver.resolve_token(&mut cs, TOKEN, "bond").await.unwrap();
        assert!(resolved.created);
        let Some(Entity::Token(token)) = cs.get(&resolved.id) else {
            panic!("expected token");
        };
        assert_eq!(token.decimals, 6);
        assert_eq!(token.name, "");
        assert_eq!(token.token_type, "bond");
        assert!(token.total_supply.is_zero());
        assert!(!token.is_bond());
        assert_eq!(token.denomination_asset, None);
    }

    #[tokio::test]
    async fn test_new_token_starts_at_zero_supply() {
        let reader =
            MockContractReader::new().with_token(TOKEN, "Bond", "BND", 0, U256::from(500u32));
        let (resolver, _repo, reader, _temp) = setup(reader).await;
        let mut cs = change_set(1);

        let resolved = resolver.resolve_token(&mut cs, TOKEN, "bond").await.unwrap();
        let Some(Entity::Token(token)) = cs.get(&resolved.id) else {
            panic!("expected token");
        };
        assert!(token.total_supply.is_zero());
        // name, symbol, decimals, face value, denomination asset
        assert_eq!(reader.calls(), 5);
    }

    #[tokio::test]
    async fn test_existing_entity_is_not_reread() {
        let reader = MockContractReader::new().with_token(TOKEN, "Bond", "BND", 18, U256::ZERO);
        let (resolver, repo, reader, _temp) = setup(reader).await;

        let mut cs = change_set(1);
        resolver.resolve_token(&mut cs, TOKEN, "bond").await.unwrap();
        repo.commit(&cs).await.unwrap();
        let calls = reader.calls();

        let mut cs = change_set(2);
        let again = resolver.resolve_token(&mut cs, TOKEN, "equity").await.unwrap();
        assert!(!again.created);
        assert_eq!(reader.calls(), calls);
        let Some(Entity::Token(token)) = cs.get(&again.id) else {
            panic!("expected token");
        };
        assert_eq!(token.token_type, "bond");
    }

    #[tokio::test]
    async fn test_balance_takes_token_decimals() {
        let reader = MockContractReader::new().with_token(TOKEN, "Bond", "BND", 2, U256::ZERO);
        let (resolver, _repo, _reader, _temp) = setup(reader).await;
        let mut cs = change_set(1);

        let resolved = resolver.resolve_balance(&mut cs, TOKEN, HOLDER).await.unwrap();
        let Some(Entity::TokenBalance(balance)) = cs.get(&resolved.id) else {
            panic!("expected balance");
        };
        assert_eq!(balance.value.decimals(), 2);
        assert!(cs.get(&EntityId::from_address(TOKEN)).is_some());
    }

    #[tokio::test]
    async fn test_unrepresentable_decimals_are_fatal() {
        let reader = MockContractReader::new().with_value(
            TOKEN,
            Accessor::Decimals,
            ReadValue::Uint(U256::from(78u8)),
        );
        let (resolver, _repo, _reader, _temp) = setup(reader).await;
        let mut cs = change_set(1);

        let err = resolver.resolve_token(&mut cs, TOKEN, "").await.unwrap_err();
        assert!(matches!(err, IndexError::Arithmetic(_)));
    }

    #[tokio::test]
    async fn test_kind_mismatch() {
        let (resolver, _repo, _reader, _temp) = setup(MockContractReader::new()).await;
        let mut cs = change_set(1);
        resolver.resolve_account(&mut cs, TOKEN).await.unwrap();

        let err = resolver.resolve_token(&mut cs, TOKEN, "").await.unwrap_err();
        assert!(matches!(err, IndexError::KindMismatch { .. }));
    }

    #[tokio::test]
    async fn test_transport_failure_aborts() {
        let reader = MockContractReader::new().with_unreachable(TOKEN);
        let (resolver, _repo, _reader, _temp) = setup(reader).await;
        let mut cs = change_set(1);

        let err = resolver.resolve_token(&mut cs, TOKEN, "").await.unwrap_err();
        assert!(matches!(err, IndexError::Chain(_)));
        assert!(cs.get(&EntityId::from_address(TOKEN)).is_none());
    }

    #[tokio::test]
    async fn test_flow_is_never_created_standalone() {
        let (resolver, _repo, _reader, _temp) = setup(MockContractReader::new()).await;
        let mut cs = change_set(1);
        let id = EntityId::with_index(Address::repeat_byte(0x33), 0);
        let err = resolver.resolve(&mut cs, &id, EntityKind::Flow).await.unwrap_err();
        assert!(matches!(err, IndexError::Unresolvable { .. }));
    }
}
