//! Plan argument resolution and ABI encoding.
//!
//! Plan files write arguments as plain YAML values. Before encoding, a few
//! string forms are substituted:
//! - `@step` becomes the address deployed by an earlier step
//! - `${deployer}` becomes the sending account
//! - `${chain_id}` becomes the network chain id
//!
//! Values are then matched against the ABI parameter types. Lists fill
//! arrays and tuples; maps fill tuples by component name. Scalars are coerced
//! from their resolved string form.

use alloy_dyn_abi::{DynSolType, DynSolValue, FunctionExt, JsonAbiExt, Specifier};
use alloy_json_abi::{Function, JsonAbi, Param};
use alloy_primitives::{Address, Bytes};
use serde_json::Value;

use crate::core::errors::StepError;
use crate::domain::Registry;

/// Placeholder for the sending account
pub const DEPLOYER_PLACEHOLDER: &str = "${deployer}";

/// Placeholder for the chain id
pub const CHAIN_ID_PLACEHOLDER: &str = "${chain_id}";

/// Prefix marking a reference to an earlier step
pub const STEP_REF_PREFIX: char = '@';

/// Network facts an argument may refer to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArgEnv {
    pub deployer: Option<Address>,
    pub chain_id: Option<u64>,
}

/// Step names referenced by `@step` arguments, including inside arrays and
/// struct fields
pub fn references(values: &[Value]) -> Vec<&str> {
    let mut refs = Vec::new();
    for value in values {
        collect_references(value, &mut refs);
    }
    refs
}

fn collect_references<'a>(value: &'a Value, refs: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => {
            if let Some(name) = s.strip_prefix(STEP_REF_PREFIX) {
                refs.push(name);
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_references(v, refs)),
        Value::Object(fields) => fields.values().for_each(|v| collect_references(v, refs)),
        _ => {}
    }
}

/// Whether any argument mentions the given placeholder
pub fn mentions(values: &[Value], placeholder: &str) -> bool {
    values.iter().any(|value| mentioned(value, placeholder))
}

fn mentioned(value: &Value, placeholder: &str) -> bool {
    match value {
        Value::String(s) => s.contains(placeholder),
        Value::Array(items) => items.iter().any(|v| mentioned(v, placeholder)),
        Value::Object(fields) => fields.values().any(|v| mentioned(v, placeholder)),
        _ => false,
    }
}

/// Resolve one scalar plan value into the string form accepted by ABI
/// coercion. Arrays and structs are handled by the parameter type instead.
pub fn resolve(value: &Value, registry: &Registry, env: &ArgEnv) -> Result<String, StepError> {
    match value {
        Value::String(s) => resolve_str(s, registry, env),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Err(StepError::Encoding("null is not a valid argument".to_string())),
        Value::Array(_) | Value::Object(_) => Err(StepError::Encoding(
            "expected a single value, got a list or map".to_string(),
        )),
    }
}

fn resolve_str(s: &str, registry: &Registry, env: &ArgEnv) -> Result<String, StepError> {
    if let Some(name) = s.strip_prefix(STEP_REF_PREFIX) {
        return registry
            .address(name)
            .map(|address| address.to_string())
            .ok_or_else(|| {
                StepError::Resolve(format!("step '{}' has no address", name))
            });
    }

    let mut resolved = s.to_string();
    if resolved.contains(DEPLOYER_PLACEHOLDER) {
        let deployer = env
            .deployer
            .ok_or_else(|| StepError::Resolve("deployer address is unknown".to_string()))?;
        resolved = resolved.replace(DEPLOYER_PLACEHOLDER, &deployer.to_string());
    }
    if resolved.contains(CHAIN_ID_PLACEHOLDER) {
        let chain_id = env
            .chain_id
            .ok_or_else(|| StepError::Resolve("chain id is unknown".to_string()))?;
        resolved = resolved.replace(CHAIN_ID_PLACEHOLDER, &chain_id.to_string());
    }
    Ok(resolved)
}

/// Coerce plan values to the given ABI parameters
fn coerce(params: &[Param], values: &[Value], registry: &Registry, env: &ArgEnv) -> Result<Vec<DynSolValue>, StepError> {
    if params.len() != values.len() {
        return Err(StepError::Encoding(format!(
            "expected {} arguments, got {}",
            params.len(),
            values.len()
        )));
    }

    params
        .iter()
        .zip(values)
        .map(|(param, value)| {
            let ty: DynSolType = param
                .resolve()
                .map_err(|e| StepError::Encoding(format!("parameter '{}': {}", param.name, e)))?;
            coerce_value(&ty, &param.components, value, registry, env).map_err(|e| match e {
                StepError::Encoding(msg) => {
                    StepError::Encoding(format!("parameter '{}': {}", param.name, msg))
                }
                other => other,
            })
        })
        .collect()
}

/// Walk the parameter type alongside the plan value. Lists and maps are
/// matched structurally so element strings are never re-parsed.
fn coerce_value(
    ty: &DynSolType,
    components: &[Param],
    value: &Value,
    registry: &Registry,
    env: &ArgEnv,
) -> Result<DynSolValue, StepError> {
    match ty {
        DynSolType::Array(inner) => {
            let items = expect_list(ty, value)?;
            items
                .iter()
                .map(|v| coerce_value(inner, components, v, registry, env))
                .collect::<Result<Vec<_>, _>>()
                .map(DynSolValue::Array)
        }
        DynSolType::FixedArray(inner, len) => {
            let items = expect_list(ty, value)?;
            if items.len() != *len {
                return Err(StepError::Encoding(format!(
                    "{} needs {} elements, got {}",
                    ty.sol_type_name(),
                    len,
                    items.len()
                )));
            }
            items
                .iter()
                .map(|v| coerce_value(inner, components, v, registry, env))
                .collect::<Result<Vec<_>, _>>()
                .map(DynSolValue::FixedArray)
        }
        DynSolType::Tuple(types) => {
            let fields = tuple_fields(ty, components, value)?;
            if fields.len() != types.len() {
                return Err(StepError::Encoding(format!(
                    "{} needs {} fields, got {}",
                    ty.sol_type_name(),
                    types.len(),
                    fields.len()
                )));
            }
            types
                .iter()
                .zip(fields)
                .enumerate()
                .map(|(i, (field_ty, field))| {
                    let nested = components.get(i).map(|c| c.components.as_slice()).unwrap_or(&[]);
                    coerce_value(field_ty, nested, field, registry, env)
                })
                .collect::<Result<Vec<_>, _>>()
                .map(DynSolValue::Tuple)
        }
        _ => {
            let raw = resolve(value, registry, env)?;
            ty.coerce_str(&raw).map_err(|e| {
                StepError::Encoding(format!("cannot use '{}' as {}: {}", raw, ty.sol_type_name(), e))
            })
        }
    }
}

fn expect_list<'a>(ty: &DynSolType, value: &'a Value) -> Result<&'a Vec<Value>, StepError> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(StepError::Encoding(format!(
            "{} needs a list, got {}",
            ty.sol_type_name(),
            other
        ))),
    }
}

/// Struct fields come either as a positional list or as a map keyed by
/// component name.
fn tuple_fields<'a>(ty: &DynSolType, components: &[Param], value: &'a Value) -> Result<Vec<&'a Value>, StepError> {
    match value {
        Value::Array(items) => Ok(items.iter().collect()),
        Value::Object(fields) => {
            if components.is_empty() || components.iter().any(|c| c.name.is_empty()) {
                return Err(StepError::Encoding(format!(
                    "{} has unnamed fields; give them as a list",
                    ty.sol_type_name()
                )));
            }
            if let Some(unknown) = fields.keys().find(|k| !components.iter().any(|c| &c.name == *k)) {
                return Err(StepError::Encoding(format!("unknown field '{}'", unknown)));
            }
            components
                .iter()
                .map(|c| {
                    fields
                        .get(&c.name)
                        .ok_or_else(|| StepError::Encoding(format!("missing field '{}'", c.name)))
                })
                .collect()
        }
        other => Err(StepError::Encoding(format!(
            "{} needs a list or map, got {}",
            ty.sol_type_name(),
            other
        ))),
    }
}

/// Whether a view function returns exactly one address
pub fn returns_address(function: &Function) -> bool {
    matches!(function.outputs.as_slice(), [output] if output.ty == "address")
}

/// Decode the single address returned by a view function
pub fn decode_address(function: &Function, data: &[u8]) -> Result<Address, StepError> {
    let values = function
        .abi_decode_output(data, true)
        .map_err(|e| StepError::UnexpectedOutput(format!("cannot decode {} output: {}", function.name, e)))?;
    match values.as_slice() {
        [value] => value.as_address().ok_or_else(|| {
            StepError::UnexpectedOutput(format!("{} did not return an address", function.name))
        }),
        _ => Err(StepError::UnexpectedOutput(format!(
            "{} returned {} values, expected one address",
            function.name,
            values.len()
        ))),
    }
}

/// ABI-encode constructor arguments (no selector)
pub fn encode_constructor(abi: &JsonAbi, values: &[Value], registry: &Registry, env: &ArgEnv) -> Result<Bytes, StepError> {
    match &abi.constructor {
        Some(constructor) => {
            let tokens = coerce(&constructor.inputs, values, registry, env)?;
            constructor
                .abi_encode_input(&tokens)
                .map(Bytes::from)
                .map_err(|e| StepError::Encoding(e.to_string()))
        }
        None if values.is_empty() => Ok(Bytes::new()),
        None => Err(StepError::Encoding(format!(
            "contract has no constructor but {} arguments were given",
            values.len()
        ))),
    }
}

/// ABI-encode call data for a function (selector included)
pub fn encode_call(function: &Function, values: &[Value], registry: &Registry, env: &ArgEnv) -> Result<Bytes, StepError> {
    let tokens = coerce(&function.inputs, values, registry, env)?;
    function
        .abi_encode_input(&tokens)
        .map(Bytes::from)
        .map_err(|e| StepError::Encoding(e.to_string()))
}

/// Find the function a plan step calls.
///
/// `method` is either a full signature (`registerAssetProxy(address)`) or a
/// bare name, resolved by argument count.
pub fn find_function<'a>(abi: &'a JsonAbi, method: &str, arg_count: usize) -> Result<&'a Function, String> {
    if method.contains('(') {
        return abi
            .functions()
            .find(|f| f.signature() == method)
            .ok_or_else(|| format!("no function with signature '{}'", method));
    }

    let overloads = abi
        .function(method)
        .ok_or_else(|| format!("no function named '{}'", method))?;

    let candidates: Vec<&Function> = overloads
        .iter()
        .filter(|f| f.inputs.len() == arg_count)
        .collect();

    match candidates.as_slice() {
        [function] => Ok(function),
        [] => Err(format!(
            "function '{}' takes {} arguments, got {}",
            method,
            overloads
                .iter()
                .map(|f| f.inputs.len().to_string())
                .collect::<Vec<_>>()
                .join(" or "),
            arg_count
        )),
        _ => Err(format!(
            "function '{}' is overloaded with {} arguments; use a full signature",
            method, arg_count
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContractHandle;
    use serde_json::json;

    fn abi() -> JsonAbi {
        serde_json::from_value(json!([
            {
                "type": "constructor",
                "inputs": [
                    { "name": "name", "type": "string" },
                    { "name": "symbol", "type": "string" },
                    { "name": "decimals", "type": "uint256" },
                    { "name": "totalSupply", "type": "uint256" }
                ],
                "stateMutability": "nonpayable"
            },
            {
                "type": "function",
                "name": "registerAssetProxy",
                "inputs": [{ "name": "assetProxy", "type": "address" }],
                "outputs": [],
                "stateMutability": "nonpayable"
            },
            {
                "type": "function",
                "name": "mint",
                "inputs": [{ "name": "amount", "type": "uint256" }],
                "outputs": [],
                "stateMutability": "nonpayable"
            },
            {
                "type": "function",
                "name": "mint",
                "inputs": [
                    { "name": "to", "type": "address" },
                    { "name": "amount", "type": "uint256" }
                ],
                "outputs": [],
                "stateMutability": "nonpayable"
            }
        ]))
        .unwrap()
    }

    fn registry_with(name: &str, address: Address) -> Registry {
        let mut registry = Registry::new();
        registry
            .insert(name, Some(ContractHandle::new("ERC20Proxy", address)))
            .unwrap();
        registry
    }

    #[test]
    fn test_references_include_nested_arrays() {
        let values = vec![
            json!("@exchange"),
            json!(["@a", "0x00", ["@b"]]),
            json!({ "registry": "@c" }),
            json!(5),
        ];
        assert_eq!(references(&values), vec!["exchange", "a", "b", "c"]);
    }

    #[test]
    fn test_resolve_step_reference() {
        let address = Address::repeat_byte(0x11);
        let registry = registry_with("erc20_proxy", address);

        let resolved = resolve(&json!("@erc20_proxy"), &registry, &ArgEnv::default()).unwrap();
        assert_eq!(resolved, address.to_string());

        let missing = resolve(&json!("@exchange"), &registry, &ArgEnv::default());
        assert!(matches!(missing, Err(StepError::Resolve(_))));
    }

    #[test]
    fn test_resolve_placeholders() {
        let env = ArgEnv {
            deployer: Some(Address::repeat_byte(0x22)),
            chain_id: Some(4),
        };

        assert_eq!(resolve(&json!("${chain_id}"), &Registry::new(), &env).unwrap(), "4");
        assert_eq!(
            resolve(&json!("${deployer}"), &Registry::new(), &env).unwrap(),
            Address::repeat_byte(0x22).to_string()
        );
        assert!(resolve(&json!(["${deployer}", 1]), &Registry::new(), &env).is_err());
        assert!(mentions(&[json!(["${chain_id}"])], CHAIN_ID_PLACEHOLDER));
        assert!(mentions(&[json!({ "owner": "${deployer}" })], DEPLOYER_PLACEHOLDER));
        assert!(!mentions(&[json!("plain")], DEPLOYER_PLACEHOLDER));
    }

    #[test]
    fn test_encode_constructor_arguments() {
        let encoded = encode_constructor(
            &abi(),
            &[
                json!("0x Protocol Token"),
                json!("ZRX"),
                json!(18),
                json!("1000000000000000000000000000"),
            ],
            &Registry::new(),
            &ArgEnv::default(),
        )
        .unwrap();

        // two offsets, two uints, then two length-prefixed strings
        assert_eq!(encoded.len(), 4 * 32 + 2 * 64);
        assert_eq!(encoded[3 * 32 - 1], 18);
    }

    #[test]
    fn test_encode_constructor_argument_count() {
        let err = encode_constructor(&abi(), &[json!("only one")], &Registry::new(), &ArgEnv::default())
            .unwrap_err();
        assert!(matches!(err, StepError::Encoding(_)));
    }

    #[test]
    fn test_encode_call_has_selector() {
        let abi = abi();
        let function = find_function(&abi, "registerAssetProxy", 1).unwrap();
        let target = Address::repeat_byte(0x33);
        let registry = registry_with("erc20_proxy", target);

        let calldata = encode_call(function, &[json!("@erc20_proxy")], &registry, &ArgEnv::default()).unwrap();

        assert_eq!(calldata.len(), 4 + 32);
        assert_eq!(&calldata[..4], function.selector().as_slice());
        assert_eq!(&calldata[16..36], target.as_slice());
    }

    #[test]
    fn test_find_function_overloads() {
        let abi = abi();

        assert_eq!(find_function(&abi, "mint", 2).unwrap().inputs.len(), 2);
        assert_eq!(find_function(&abi, "mint(uint256)", 1).unwrap().inputs.len(), 1);
        assert!(find_function(&abi, "mint", 3).is_err());
        assert!(find_function(&abi, "burn", 1).is_err());
    }

    #[test]
    fn test_invalid_address_argument() {
        let abi = abi();
        let function = find_function(&abi, "registerAssetProxy", 1).unwrap();

        let err = encode_call(function, &[json!("not-an-address")], &Registry::new(), &ArgEnv::default())
            .unwrap_err();
        assert!(err.to_string().contains("registerAssetProxy") || err.to_string().contains("assetProxy"));
    }

    fn structs_abi() -> JsonAbi {
        serde_json::from_value(json!([
            {
                "type": "function",
                "name": "setNames",
                "inputs": [{ "name": "names", "type": "string[]" }],
                "outputs": [],
                "stateMutability": "nonpayable"
            },
            {
                "type": "function",
                "name": "setPair",
                "inputs": [{ "name": "pair", "type": "address[2]" }],
                "outputs": [],
                "stateMutability": "nonpayable"
            },
            {
                "type": "function",
                "name": "migrate",
                "inputs": [{
                    "name": "config",
                    "type": "tuple",
                    "internalType": "struct Migration.Config",
                    "components": [
                        { "name": "target", "type": "address" },
                        { "name": "amount", "type": "uint256" }
                    ]
                }],
                "outputs": [],
                "stateMutability": "nonpayable"
            },
            {
                "type": "function",
                "name": "getBootstrapper",
                "inputs": [],
                "outputs": [{ "name": "", "type": "address" }],
                "stateMutability": "view"
            }
        ]))
        .unwrap()
    }

    #[test]
    fn test_string_array_elements_keep_commas() {
        let abi = structs_abi();
        let function = find_function(&abi, "setNames", 1).unwrap();

        let calldata = encode_call(function, &[json!(["a,b"])], &Registry::new(), &ArgEnv::default()).unwrap();
        let decoded = function.abi_decode_input(&calldata[4..], true).unwrap();

        assert_eq!(
            decoded,
            vec![DynSolValue::Array(vec![DynSolValue::String("a,b".to_string())])]
        );
    }

    #[test]
    fn test_tuple_argument_by_list_or_map() {
        let abi = structs_abi();
        let function = find_function(&abi, "migrate", 1).unwrap();
        let target = Address::repeat_byte(0x44);
        let registry = registry_with("zero_ex", target);
        let env = ArgEnv::default();

        let by_list = encode_call(function, &[json!(["@zero_ex", 100])], &registry, &env).unwrap();
        let by_map = encode_call(function, &[json!({ "amount": "100", "target": "@zero_ex" })], &registry, &env)
            .unwrap();
        assert_eq!(by_list, by_map);

        let decoded = function.abi_decode_input(&by_map[4..], true).unwrap();
        assert_eq!(
            decoded,
            vec![DynSolValue::Tuple(vec![
                DynSolValue::Address(target),
                DynSolValue::Uint(alloy_primitives::U256::from(100), 256),
            ])]
        );
    }

    #[test]
    fn test_tuple_argument_field_errors() {
        let abi = structs_abi();
        let function = find_function(&abi, "migrate", 1).unwrap();
        let registry = Registry::new();
        let env = ArgEnv::default();

        let unknown = encode_call(
            function,
            &[json!({ "target": "0x0000000000000000000000000000000000000001", "amount": 1, "extra": 2 })],
            &registry,
            &env,
        )
        .unwrap_err();
        assert!(unknown.to_string().contains("unknown field 'extra'"));

        let missing = encode_call(
            function,
            &[json!({ "target": "0x0000000000000000000000000000000000000001" })],
            &registry,
            &env,
        )
        .unwrap_err();
        assert!(missing.to_string().contains("missing field 'amount'"));

        let short = encode_call(function, &[json!(["0x0000000000000000000000000000000000000001"])], &registry, &env)
            .unwrap_err();
        assert!(matches!(short, StepError::Encoding(_)));
    }

    #[test]
    fn test_fixed_array_length_checked() {
        let abi = structs_abi();
        let function = find_function(&abi, "setPair", 1).unwrap();
        let one = "0x0000000000000000000000000000000000000001";

        assert!(encode_call(function, &[json!([one, one])], &Registry::new(), &ArgEnv::default()).is_ok());
        let err = encode_call(function, &[json!([one])], &Registry::new(), &ArgEnv::default()).unwrap_err();
        assert!(err.to_string().contains("parameter 'pair'"));
        let scalar = encode_call(function, &[json!(one)], &Registry::new(), &ArgEnv::default()).unwrap_err();
        assert!(matches!(scalar, StepError::Encoding(_)));
    }

    #[test]
    fn test_decode_address_output() {
        let abi = structs_abi();
        let function = find_function(&abi, "getBootstrapper", 0).unwrap();
        let bootstrapper = Address::repeat_byte(0x55);

        assert!(returns_address(function));
        assert!(!returns_address(find_function(&abi, "setNames", 1).unwrap()));
        assert_eq!(
            decode_address(function, bootstrapper.into_word().as_slice()).unwrap(),
            bootstrapper
        );
        assert!(matches!(
            decode_address(function, &[0u8; 4]),
            Err(StepError::UnexpectedOutput(_))
        ));
    }
}
