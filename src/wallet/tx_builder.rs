// Building and signing transfer transactions

use crate::core::{Transaction, TxInput, TxOutput};
use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::wallet::address::decode_address;
use crate::wallet::keystore::Wallets;

/// Build a signed transaction moving `amount` from `from` to `to`.
///
/// Spendable outputs are selected through the UTXO index in index order; a
/// change output back to the sender is added when the selection overshoots.
/// Fails with `InsufficientFunds` when the sender's unspent total is short.
pub fn new_transaction(
    storage: &Storage,
    wallets: &Wallets,
    from: &str,
    to: &str,
    amount: u64,
) -> Result<Transaction> {
    let keypair = wallets
        .get(from)
        .ok_or_else(|| Error::Wallet(format!("address {from} is not in this wallet")))?;
    let from_hash = keypair.pubkey_hash();
    let to_hash = decode_address(to)?;

    let (total, selection) = storage.utxos.find_spendable(&from_hash, amount)?;
    if total < amount {
        return Err(Error::InsufficientFunds {
            available: total,
            required: amount,
        });
    }

    let inputs: Vec<TxInput> = selection
        .into_iter()
        .map(|(txid, index)| TxInput::new(txid, index as i32, keypair.pubkey_xy().to_vec()))
        .collect();

    let mut outputs = vec![TxOutput::new(amount, to_hash.to_vec())];
    if total > amount {
        outputs.push(TxOutput::new(total - amount, from_hash.to_vec()));
    }

    let mut tx = Transaction::new(inputs, outputs);
    storage.chain.sign_transaction(&mut tx, &keypair.secret_key)?;
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::CancelFlag;
    use crate::core::SUBSIDY;

    struct Fixture {
        storage: Storage,
        wallets: Wallets,
        from: String,
        to: String,
    }

    fn fixture() -> Fixture {
        let mut wallets = Wallets::new();
        let from = wallets.create_wallet();
        let to = wallets.create_wallet();

        let mut storage = Storage::memory().unwrap();
        let from_hash = decode_address(&from).unwrap();
        storage
            .init_chain(&from_hash, "genesis", &CancelFlag::new())
            .unwrap();

        Fixture {
            storage,
            wallets,
            from,
            to,
        }
    }

    #[test]
    fn test_transfer_with_change() {
        let f = fixture();
        let tx = new_transaction(&f.storage, &f.wallets, &f.from, &f.to, 40).unwrap();

        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[0].value, 40);
        assert_eq!(tx.outputs[1].value, SUBSIDY - 40);
        assert!(f.storage.chain.verify_transaction(&tx).unwrap());
    }

    #[test]
    fn test_exact_transfer_has_no_change() {
        let f = fixture();
        let tx = new_transaction(&f.storage, &f.wallets, &f.from, &f.to, SUBSIDY).unwrap();

        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].value, SUBSIDY);
    }

    #[test]
    fn test_mined_transfer_updates_balances() {
        let mut f = fixture();
        let tx = new_transaction(&f.storage, &f.wallets, &f.from, &f.to, 40).unwrap();
        f.storage
            .mine_block(vec![tx], &CancelFlag::new())
            .unwrap();

        let from_hash = decode_address(&f.from).unwrap();
        let to_hash = decode_address(&f.to).unwrap();
        assert_eq!(f.storage.utxos.balance(&from_hash).unwrap(), SUBSIDY - 40);
        assert_eq!(f.storage.utxos.balance(&to_hash).unwrap(), 40);
    }

    #[test]
    fn test_insufficient_funds_reported() {
        let f = fixture();
        let result = new_transaction(&f.storage, &f.wallets, &f.from, &f.to, SUBSIDY + 1);

        match result {
            Err(Error::InsufficientFunds {
                available,
                required,
            }) => {
                assert_eq!(available, SUBSIDY);
                assert_eq!(required, SUBSIDY + 1);
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_sender_rejected() {
        let f = fixture();
        let stranger = crate::wallet::KeyPair::generate().address();
        assert!(matches!(
            new_transaction(&f.storage, &f.wallets, &stranger, &f.to, 1),
            Err(Error::Wallet(_))
        ));
    }

    #[test]
    fn test_bad_recipient_rejected() {
        let f = fixture();
        assert!(matches!(
            new_transaction(&f.storage, &f.wallets, &f.from, "not an address", 1),
            Err(Error::InvalidAddress(_))
        ));
    }
}
