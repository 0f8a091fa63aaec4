use alloy::sol;

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    interface GenericERC20 {
        function balanceOf(address account) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
        function decimals() external view returns (uint8);

        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}
