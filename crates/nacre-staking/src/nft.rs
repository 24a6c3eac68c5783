// crates/nacre-staking/src/nft.rs
//
// In-memory position registry.
//
// Positions are transferable ownership tokens, each tied to the pool it
// was minted for. Owners may approve one spender per token or an operator
// for all their tokens. Token ids start at 1.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use nacre_core::{AccountId, NacreError, PoolId, PositionId, PositionRegistry};

/// Owner and pool of a minted position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenInfo {
    pub pool_id: PoolId,
    pub owner: AccountId,
}

/// The staking position NFT.
#[derive(Debug, Clone, Default)]
pub struct StakingNft {
    tokens: BTreeMap<PositionId, TokenInfo>,
    balances: HashMap<AccountId, u64>,
    approvals: HashMap<PositionId, AccountId>,
    operators: HashSet<(AccountId, AccountId)>,
    minted: u64,
}

impl StakingNft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tokens ever minted, burned ones included.
    pub fn total_supply(&self) -> u64 {
        self.minted
    }

    /// # Errors
    /// `NotMinted` if the token does not exist.
    pub fn token_info(&self, id: PositionId) -> Result<TokenInfo, NacreError> {
        self.tokens.get(&id).copied().ok_or(NacreError::NotMinted(id))
    }

    /// Number of tokens held by `owner`.
    ///
    /// # Errors
    /// `InvalidRecipient` for the zero account.
    pub fn balance_of(&self, owner: &AccountId) -> Result<u64, NacreError> {
        if owner.is_zero() {
            return Err(NacreError::InvalidRecipient);
        }
        Ok(self.balances.get(owner).copied().unwrap_or(0))
    }

    /// Approve `spender` for one token. Only the owner or an operator may
    /// approve.
    pub fn approve(
        &mut self,
        caller: &AccountId,
        spender: &AccountId,
        id: PositionId,
    ) -> Result<(), NacreError> {
        let owner = self.owner_of(id)?;
        if *caller != owner && !self.operators.contains(&(owner, *caller)) {
            return Err(NacreError::NotAuthorized(id));
        }
        self.approvals.insert(id, *spender);
        Ok(())
    }

    pub fn get_approved(&self, id: PositionId) -> Result<Option<AccountId>, NacreError> {
        self.token_info(id)?;
        Ok(self.approvals.get(&id).copied())
    }

    /// Let `operator` manage every token `owner` holds.
    pub fn set_approval_for_all(&mut self, owner: &AccountId, operator: &AccountId, approved: bool) {
        if approved {
            self.operators.insert((*owner, *operator));
        } else {
            self.operators.remove(&(*owner, *operator));
        }
    }

    pub fn is_approved_for_all(&self, owner: &AccountId, operator: &AccountId) -> bool {
        self.operators.contains(&(*owner, *operator))
    }

    /// Transfer a token. Clears its single-token approval.
    ///
    /// # Errors
    /// - `WrongFrom` if `from` is not the owner.
    /// - `InvalidRecipient` if `to` is the zero account.
    /// - `NotAuthorized` if `caller` is neither owner, approved, nor operator.
    pub fn transfer_from(
        &mut self,
        caller: &AccountId,
        from: &AccountId,
        to: &AccountId,
        id: PositionId,
    ) -> Result<(), NacreError> {
        let info = self.token_info(id)?;
        if info.owner != *from {
            return Err(NacreError::WrongFrom(id));
        }
        if to.is_zero() {
            return Err(NacreError::InvalidRecipient);
        }
        if !self.is_approved_or_owner(caller, id)? {
            return Err(NacreError::NotAuthorized(id));
        }

        self.approvals.remove(&id);
        if let Some(balance) = self.balances.get_mut(from) {
            *balance = balance.saturating_sub(1);
        }
        *self.balances.entry(*to).or_insert(0) += 1;
        self.tokens.insert(id, TokenInfo { owner: *to, ..info });
        Ok(())
    }
}

impl PositionRegistry for StakingNft {
    fn mint(&mut self, pool_id: PoolId, to: &AccountId) -> Result<PositionId, NacreError> {
        if to.is_zero() {
            return Err(NacreError::InvalidRecipient);
        }
        self.minted += 1;
        let id = self.minted;
        self.tokens.insert(id, TokenInfo { pool_id, owner: *to });
        *self.balances.entry(*to).or_insert(0) += 1;
        Ok(id)
    }

    fn burn(&mut self, id: PositionId) -> Result<(), NacreError> {
        let info = self.tokens.remove(&id).ok_or(NacreError::NotMinted(id))?;
        self.approvals.remove(&id);
        if let Some(balance) = self.balances.get_mut(&info.owner) {
            *balance = balance.saturating_sub(1);
        }
        Ok(())
    }

    fn owner_of(&self, id: PositionId) -> Result<AccountId, NacreError> {
        self.token_info(id).map(|info| info.owner)
    }

    fn pool_of(&self, id: PositionId) -> Result<PoolId, NacreError> {
        self.token_info(id).map(|info| info.pool_id)
    }

    fn is_approved_or_owner(&self, spender: &AccountId, id: PositionId) -> Result<bool, NacreError> {
        let owner = self.owner_of(id)?;
        Ok(*spender == owner
            || self.approvals.get(&id) == Some(spender)
            || self.operators.contains(&(owner, *spender)))
    }
}
